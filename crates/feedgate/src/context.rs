//! Application context: owns the components and their startup and
//! shutdown order.

use std::sync::Arc;

use anyhow::Context;
use feedgate_auth::{AuthorizationGate, Blocklist};
use feedgate_core::{Clock, SystemClock};
use feedgate_meter::{AccessMeter, ArchivalDrainer, DrainReport, LogShipper};
use feedgate_store::{Backends, BlobStore, CounterStore, Reachable};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::guard::{AddressBlocklist, Gate, Meter, RequestGuard};

pub type Drainer = ArchivalDrainer<dyn CounterStore, dyn BlobStore>;

/// The running pipeline.
pub struct AppContext {
    config: AppConfig,
    backends: Backends,
    gate: Arc<Gate>,
    blocklist: Arc<AddressBlocklist>,
    meter: Arc<Meter>,
    drainer: Arc<Drainer>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AppContext {
    /// Start with the system clock.
    pub async fn start(config: AppConfig, backends: Backends) -> anyhow::Result<Self> {
        Self::start_with_clock(config, backends, Arc::new(SystemClock)).await
    }

    /// Start the pipeline.
    ///
    /// Order: counter store ping, bucket provisioning, meter workers,
    /// drain loop, log shipper.
    pub async fn start_with_clock(
        config: AppConfig,
        backends: Backends,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        match backends.counters.ping().await {
            Ok(()) => info!("counter store reachable"),
            Err(error) => warn!(%error, "counter store unreachable at startup"),
        }

        let mut buckets = vec![config.drain.bucket.clone()];
        if config.log_shipping.enabled {
            buckets.push(config.log_shipping.bucket.clone());
        }
        for bucket in &buckets {
            let created = backends
                .blobs
                .ensure_bucket(bucket)
                .await
                .with_context(|| format!("failed to provision bucket {}", bucket))?;
            if created {
                info!(bucket = %bucket, "created bucket");
            }
        }

        let gate: Arc<Gate> = Arc::new(AuthorizationGate::new(
            Arc::clone(&backends.cache),
            Arc::clone(&backends.records),
            config.gate.status_ttl,
        ));
        let blocklist: Arc<AddressBlocklist> = Arc::new(Blocklist::new(
            Arc::clone(&backends.cache),
            Arc::clone(&backends.records),
            Arc::clone(&clock),
            config.blocklist.clone(),
        ));
        let meter: Arc<Meter> = Arc::new(AccessMeter::start(
            Arc::clone(&backends.counters),
            config.meter.clone(),
        ));
        let drainer: Arc<Drainer> = Arc::new(ArchivalDrainer::new(
            Arc::clone(&backends.counters),
            Arc::clone(&backends.blobs),
            Arc::clone(&clock),
            config.drain.clone(),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        {
            let drainer = Arc::clone(&drainer);
            let shutdown_rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { drainer.run(shutdown_rx).await }));
        }

        if config.log_shipping.enabled {
            let shipper = LogShipper::new(
                Arc::clone(&backends.blobs),
                Arc::clone(&clock),
                config.log_shipping.clone(),
            );
            tasks.push(tokio::spawn(async move { shipper.run(shutdown_rx).await }));
        }

        info!("feedgate started");
        Ok(Self {
            config,
            backends,
            gate,
            blocklist,
            meter,
            drainer,
            shutdown,
            tasks,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn drainer(&self) -> &Drainer {
        &self.drainer
    }

    /// A guard sharing this context's components.
    pub fn guard(&self) -> RequestGuard {
        RequestGuard::new(
            Arc::clone(&self.gate),
            Arc::clone(&self.blocklist),
            Arc::clone(&self.meter),
            self.config.gate.clone(),
        )
    }

    /// Stop background work.
    ///
    /// The drain loop and log shipper stop at their next boundary, queued
    /// increments are flushed, then one last drain runs if configured.
    /// Returns that drain's report.
    pub async fn shutdown(self) -> Option<DrainReport> {
        info!("feedgate shutting down");
        // Receivers may already be gone if a task panicked.
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(error) = task.await {
                warn!(%error, "background task failed");
            }
        }

        self.meter.shutdown().await;

        let report = if self.config.drain.drain_on_shutdown {
            Some(self.drainer.drain_once().await)
        } else {
            None
        };
        info!("feedgate stopped");
        report
    }
}
