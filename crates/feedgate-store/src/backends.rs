//! A bundle of store handles.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::memory::{MemoryBlobStore, MemoryCounters, MemoryKv, MemoryRecords};
use crate::sqlite::SqliteStore;
use crate::traits::{BlobStore, CounterStore, KeyValueStore, SystemOfRecord};

/// The four stores the pipeline talks to.
///
/// Components receive these handles at construction; nothing reaches for
/// a global client.
#[derive(Clone)]
pub struct Backends {
    pub cache: Arc<dyn KeyValueStore>,
    pub counters: Arc<dyn CounterStore>,
    pub records: Arc<dyn SystemOfRecord>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backends {
    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            cache: Arc::new(MemoryKv::new()),
            counters: Arc::new(MemoryCounters::new()),
            records: Arc::new(MemoryRecords::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    /// Every store backed by one SQLite database file.
    pub fn sqlite(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::shared(Arc::new(SqliteStore::open(path)?)))
    }

    /// Every store backed by one SQLite handle.
    pub fn shared(store: Arc<SqliteStore>) -> Self {
        Self {
            cache: store.clone(),
            counters: store.clone(),
            records: store.clone(),
            blobs: store,
        }
    }
}
