//! Archival drain.
//!
//! Each cycle harvests every access counter, groups the counts by subject
//! and uploads one immutable JSON object per subject:
//!
//! ```text
//! ping ─► lease ─► scan ─► decode ─► get_del ─► group ─► upload ─► release
//!                             │                             │
//!                         malformed:                   failed upload:
//!                         move to quarantine           incr_by restores counts
//! ```
//!
//! Fetch-and-clear hands each counted unit to exactly one cycle. An upload
//! failure adds the drained counts back with atomic increments, so accesses
//! recorded while the cycle ran are kept as well.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use feedgate_core::{
    ArchivalBatch, Clock, CounterKey, SubjectId, ARCHIVE_CONTENT_TYPE, COUNTER_NAMESPACE,
};
use feedgate_store::{BlobStore, CounterStore, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{MeterError, Result};
use crate::lease::DrainLease;

/// Upper bound on `-<n>` suffixes tried for one batch.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Malformed counter keys are moved under this prefix, outside the drained
/// namespace, with their value intact.
pub const QUARANTINE_PREFIX: &str = "quarantine:";

/// Configuration for the archival drainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Time between cycles.
    #[serde(with = "feedgate_core::duration_secs")]
    pub interval: Duration,
    /// Bucket receiving archive objects.
    pub bucket: String,
    /// Name of the lease guarding the namespace.
    pub lease_name: String,
    /// How long a claimed lease stays valid without release.
    #[serde(with = "feedgate_core::duration_secs")]
    pub lease_ttl: Duration,
    /// Run one last cycle while shutting down.
    pub drain_on_shutdown: bool,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            bucket: "user-logs".to_string(),
            lease_name: format!("drain-lease:{}", COUNTER_NAMESPACE),
            lease_ttl: Duration::from_secs(10 * 60),
            drain_on_shutdown: true,
        }
    }
}

impl DrainConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_drain_on_shutdown(mut self, enabled: bool) -> Self {
        self.drain_on_shutdown = enabled;
        self
    }
}

/// Why a cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The counter store did not answer.
    StoreUnreachable,
    /// Another drainer holds the lease.
    LeaseHeld,
    /// This drainer is already running a cycle.
    CycleInProgress,
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Set when the cycle was skipped before touching any key.
    pub skipped: Option<SkipReason>,
    /// Keys found under the namespace.
    pub keys_scanned: usize,
    /// Keys whose value was fetched and cleared.
    pub keys_drained: usize,
    /// Keys that did not decode; moved to quarantine.
    pub malformed_keys: usize,
    /// Sum of counts moved to quarantine.
    pub units_quarantined: u64,
    /// Keys that vanished or held zero by the time they were cleared.
    pub empty_keys: usize,
    /// Keys whose fetch-and-clear failed.
    pub read_failures: usize,
    /// Sum of all drained counts.
    pub units_drained: u64,
    /// Sum of counts in successfully uploaded batches.
    pub units_archived: u64,
    /// Names of the uploaded objects.
    pub objects: Vec<String>,
    /// Batches whose upload failed and whose counts were added back.
    pub batches_restored: usize,
    /// Entries that could not be added back; their counts are lost.
    pub restore_failures: usize,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn batches_uploaded(&self) -> usize {
        self.objects.len()
    }
}

/// Periodically moves access counts from the counter store to blob storage.
pub struct ArchivalDrainer<C, B>
where
    C: CounterStore + ?Sized,
    B: BlobStore + ?Sized,
{
    counters: Arc<C>,
    blobs: Arc<B>,
    clock: Arc<dyn Clock>,
    lease: DrainLease<C>,
    cycle: Mutex<()>,
    config: DrainConfig,
}

impl<C, B> ArchivalDrainer<C, B>
where
    C: CounterStore + ?Sized,
    B: BlobStore + ?Sized,
{
    pub fn new(counters: Arc<C>, blobs: Arc<B>, clock: Arc<dyn Clock>, config: DrainConfig) -> Self {
        let lease = DrainLease::new(Arc::clone(&counters), config.lease_name.clone(), config.lease_ttl);
        Self {
            counters,
            blobs,
            clock,
            lease,
            cycle: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    pub fn lease(&self) -> &DrainLease<C> {
        &self.lease
    }

    /// Run one drain cycle.
    ///
    /// Per-key and per-subject failures are recorded in the report and
    /// never abort the rest of the cycle. A call made while another cycle
    /// of this drainer is running is skipped.
    pub async fn drain_once(&self) -> DrainReport {
        let _cycle = match self.cycle.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!(holder = self.lease.holder(), "drain cycle already running, skipping");
                return DrainReport::skipped(SkipReason::CycleInProgress);
            }
        };

        if let Err(error) = self.counters.ping().await {
            warn!(%error, "counter store unreachable, skipping drain");
            return DrainReport::skipped(SkipReason::StoreUnreachable);
        }

        match self.lease.try_acquire().await {
            Ok(true) => {}
            Ok(false) => {
                info!(lease = self.lease.name(), "drain lease held by another drainer, skipping");
                return DrainReport::skipped(SkipReason::LeaseHeld);
            }
            Err(error) => {
                warn!(%error, "could not claim drain lease, skipping drain");
                return DrainReport::skipped(SkipReason::StoreUnreachable);
            }
        }

        let mut report = DrainReport::default();
        self.drain_namespace(&mut report).await;

        if let Err(error) = self.lease.release().await {
            warn!(%error, "failed to release drain lease; it will lapse");
        }

        info!(
            keys_scanned = report.keys_scanned,
            keys_drained = report.keys_drained,
            malformed_keys = report.malformed_keys,
            units_quarantined = report.units_quarantined,
            batches_uploaded = report.batches_uploaded(),
            batches_restored = report.batches_restored,
            units_drained = report.units_drained,
            "drain cycle finished"
        );
        report
    }

    async fn drain_namespace(&self, report: &mut DrainReport) {
        let keys = match self.counters.scan_prefix(COUNTER_NAMESPACE).await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(%error, "counter scan failed");
                return;
            }
        };
        report.keys_scanned = keys.len();

        let drained_at = self.clock.now();
        let mut batches: BTreeMap<SubjectId, ArchivalBatch> = BTreeMap::new();

        for raw in keys {
            // Decode before clearing so a malformed key keeps its value.
            let key = match CounterKey::decode(&raw) {
                Ok(key) => key,
                Err(error) => {
                    warn!(key = %raw, %error, "quarantining malformed counter key");
                    report.malformed_keys += 1;
                    report.units_quarantined += self.quarantine(&raw).await;
                    continue;
                }
            };

            let count = match self.counters.get_del(&raw).await {
                Ok(Some(count)) if count > 0 => count,
                Ok(_) => {
                    report.empty_keys += 1;
                    continue;
                }
                Err(error) => {
                    warn!(key = %raw, %error, "fetch-and-clear failed");
                    report.read_failures += 1;
                    continue;
                }
            };

            debug!(key = %raw, count, "drained counter");
            report.keys_drained += 1;
            report.units_drained += count;
            batches
                .entry(key.subject.clone())
                .or_insert_with(|| ArchivalBatch::new(key.subject, drained_at))
                .push(key.resource, count, drained_at);
        }

        for batch in batches.into_values() {
            match self.upload(&batch).await {
                Ok(name) => {
                    info!(subject = %batch.subject, object = %name, total = batch.total_count(), "archived batch");
                    report.units_archived += batch.total_count();
                    report.objects.push(name);
                }
                Err(err) => {
                    warn!(subject = %batch.subject, error = %err, "archive upload failed, restoring counts");
                    self.restore(&batch, report).await;
                }
            }
        }
    }

    async fn upload(&self, batch: &ArchivalBatch) -> Result<String> {
        let body = Bytes::from(batch.to_json_bytes()?);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = batch.object_name(attempt);
            match self
                .blobs
                .put_object(&self.config.bucket, &name, body.clone(), ARCHIVE_CONTENT_TYPE)
                .await
            {
                Ok(()) => return Ok(name),
                Err(StoreError::ObjectExists { .. }) => {
                    debug!(object = %name, "object name taken, trying next suffix");
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(MeterError::NameExhausted(batch.object_name(0)))
    }

    /// Move a malformed key's value to `quarantine:<key>`. Returns the
    /// count moved.
    async fn quarantine(&self, raw: &str) -> u64 {
        let count = match self.counters.get_del(raw).await {
            Ok(Some(count)) if count > 0 => count,
            Ok(_) => return 0,
            Err(error) => {
                warn!(key = %raw, %error, "could not clear malformed key, left in place");
                return 0;
            }
        };

        let target = format!("{}{}", QUARANTINE_PREFIX, raw);
        if let Err(error) = self.counters.incr_by(&target, count).await {
            warn!(key = %raw, count, %error, "quarantine write failed, putting count back");
            if let Err(error) = self.counters.incr_by(raw, count).await {
                error!(key = %raw, count, %error, "malformed key count lost");
            }
            return 0;
        }
        count
    }

    async fn restore(&self, batch: &ArchivalBatch, report: &mut DrainReport) {
        for entry in &batch.entries {
            let key = CounterKey::new(entry.resource.clone(), batch.subject.clone()).encode();
            if let Err(error) = self.counters.incr_by(&key, entry.access_count).await {
                error!(key = %key, count = entry.access_count, %error, "failed to restore drained count");
                report.restore_failures += 1;
            }
        }
        report.batches_restored += 1;
    }

    /// Drain every `interval` until `shutdown` turns true or its sender is
    /// dropped. A cycle in progress always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.interval, holder = self.lease.holder(), "drain loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("drain loop stopped");
    }
}
