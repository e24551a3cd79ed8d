//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use feedgate_core::{ArchivalBatch, ArchiveEntry, CounterKey, ManualClock, ResourceId, SubjectId};
use feedgate_store::{
    Backends, MemoryBlobStore, MemoryCounters, MemoryKv, MemoryRecords, SubjectDocument,
};

/// The instant every fixture clock starts at: 2024-05-01T10:00:07Z.
pub fn fixed_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 7)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Encoded counter key for a `(resource, subject)` pair.
///
/// Panics on identifiers that cannot be encoded.
pub fn counter_key(resource: &str, subject: &str) -> String {
    CounterKey::new(
        ResourceId::new(resource).expect("valid resource id"),
        SubjectId::new(subject).expect("valid subject id"),
    )
    .encode()
}

/// In-memory stores with typed handles kept for fault injection.
pub struct TestBackends {
    pub kv: Arc<MemoryKv>,
    pub counters: Arc<MemoryCounters>,
    pub records: Arc<MemoryRecords>,
    pub blobs: Arc<MemoryBlobStore>,
    pub clock: Arc<ManualClock>,
}

impl TestBackends {
    pub fn new() -> Self {
        Self {
            kv: Arc::new(MemoryKv::new()),
            counters: Arc::new(MemoryCounters::new()),
            records: Arc::new(MemoryRecords::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            clock: Arc::new(ManualClock::new(fixed_instant())),
        }
    }

    /// The same stores behind trait objects.
    pub fn backends(&self) -> Backends {
        Backends {
            cache: self.kv.clone(),
            counters: self.counters.clone(),
            records: self.records.clone(),
            blobs: self.blobs.clone(),
        }
    }

    /// Register a subject. `None` leaves the entitlement field out.
    pub fn register(&self, credential: &str, entitled: Option<bool>) {
        let document = match entitled {
            Some(flag) => SubjectDocument::new().with_entitlement(flag),
            None => SubjectDocument::new(),
        };
        self.records.insert_subject(credential, document);
    }

    /// Current value of a counter, without draining it.
    pub fn count(&self, resource: &str, subject: &str) -> Option<u64> {
        self.counters
            .snapshot()
            .get(&counter_key(resource, subject))
            .copied()
    }

    /// Every archive object in `bucket`, parsed.
    pub fn archived(&self, bucket: &str) -> Vec<(String, Vec<ArchiveEntry>)> {
        self.blobs
            .objects_in(bucket)
            .into_iter()
            .map(|object| {
                let entries =
                    ArchivalBatch::parse_entries(&object.body).expect("archive body is valid");
                (object.name, entries)
            })
            .collect()
    }

    /// Sum of `accessCount` over every archive object in `bucket`.
    pub fn archived_total(&self, bucket: &str) -> u64 {
        self.archived(bucket)
            .iter()
            .flat_map(|(_, entries)| entries.iter())
            .map(|entry| entry.access_count)
            .sum()
    }
}

impl Default for TestBackends {
    fn default() -> Self {
        Self::new()
    }
}
