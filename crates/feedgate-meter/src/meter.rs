//! Access metering.
//!
//! [`AccessMeter::record`] never waits: it places the counter key on a
//! bounded queue and returns. A fixed pool of workers drains the queue
//! into the counter store. When the queue is full the increment is
//! dropped and logged instead of stalling the request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use feedgate_core::{CounterKey, ResourceId, SubjectId};
use feedgate_store::CounterStore;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the access meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Number of increment workers.
    pub workers: usize,
    /// Pending increments held before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl MeterConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// What happened to a recorded access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// Queue full or meter shut down.
    Dropped,
}

/// Counters describing meter activity since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterStats {
    pub applied: u64,
    pub dropped: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Tally {
    applied: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

enum Job {
    Increment(CounterKey),
    Stop,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

/// Fire-and-forget access counter.
pub struct AccessMeter<C: CounterStore + ?Sized> {
    counters: Arc<C>,
    sender: mpsc::Sender<Job>,
    receiver: SharedReceiver,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    tally: Arc<Tally>,
}

impl<C: CounterStore + ?Sized + 'static> AccessMeter<C> {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(counters: Arc<C>, config: MeterConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let tally = Arc::new(Tally::default());

        let worker_count = config.workers.max(1);
        let workers = (0..worker_count)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&counters),
                    Arc::clone(&tally),
                ))
            })
            .collect();

        info!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            "access meter started"
        );

        Self {
            counters,
            sender,
            receiver,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            tally,
        }
    }

    /// Count one access of `resource` by `subject`.
    pub fn record(&self, resource: ResourceId, subject: SubjectId) -> Dispatch {
        if self.closed.load(Ordering::SeqCst) {
            self.tally.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(%resource, %subject, "meter is shut down, access not counted");
            return Dispatch::Dropped;
        }

        match self.sender.try_send(Job::Increment(CounterKey::new(resource, subject))) {
            Ok(()) => Dispatch::Queued,
            Err(TrySendError::Full(Job::Increment(key))) => {
                self.tally.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key.encode(), "meter queue full, access not counted");
                Dispatch::Dropped
            }
            Err(_) => {
                self.tally.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("meter queue closed, access not counted");
                Dispatch::Dropped
            }
        }
    }

    pub fn stats(&self) -> MeterStats {
        MeterStats {
            applied: self.tally.applied.load(Ordering::Relaxed),
            dropped: self.tally.dropped.load(Ordering::Relaxed),
            failed: self.tally.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting accesses, apply everything already queued, and join
    /// the workers. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        // Stop jobs queue behind every pending increment.
        for _ in 0..workers.len() {
            if self.sender.send(Job::Stop).await.is_err() {
                break;
            }
        }
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(%error, "meter worker panicked");
            }
        }

        // Accesses that raced with the stop jobs.
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            if let Job::Increment(key) = job {
                apply_counted(&self.tally, increment(self.counters.as_ref(), &key).await);
            }
        }

        let stats = self.stats();
        info!(
            applied = stats.applied,
            dropped = stats.dropped,
            failed = stats.failed,
            "access meter stopped"
        );
    }
}

async fn run_worker<C: CounterStore + ?Sized>(
    id: usize,
    receiver: SharedReceiver,
    counters: Arc<C>,
    tally: Arc<Tally>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        match job {
            Some(Job::Increment(key)) => {
                apply_counted(&tally, increment(counters.as_ref(), &key).await)
            }
            Some(Job::Stop) | None => break,
        }
    }
    debug!(worker = id, "meter worker exiting");
}

fn apply_counted(tally: &Tally, ok: bool) {
    if ok {
        tally.applied.fetch_add(1, Ordering::Relaxed);
    } else {
        tally.failed.fetch_add(1, Ordering::Relaxed);
    }
}

async fn increment<C: CounterStore + ?Sized>(counters: &C, key: &CounterKey) -> bool {
    let encoded = key.encode();
    match counters.incr_by(&encoded, 1).await {
        Ok(value) => {
            debug!(key = %encoded, value, "access counted");
            true
        }
        Err(error) => {
            warn!(key = %encoded, %error, "meter write failed");
            false
        }
    }
}
