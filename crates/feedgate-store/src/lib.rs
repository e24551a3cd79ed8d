//! # Feedgate Store
//!
//! Storage abstraction for feedgate. Every external store the pipeline
//! touches sits behind a trait so components receive explicit client
//! handles instead of reaching for process-wide globals.
//!
//! ## Key Types
//!
//! - [`KeyValueStore`] - TTL'd string values (status cache)
//! - [`CounterStore`] - Atomic counters and the drain lease
//! - [`SystemOfRecord`] - Authoritative subject documents
//! - [`BlobStore`] - Create-only archival object storage
//! - [`SqliteStore`] - Durable single-file backend implementing every trait
//! - [`Backends`] - The four store handles bundled for injection
//! - [`MemoryKv`], [`MemoryCounters`], [`MemoryRecords`], [`MemoryBlobStore`] -
//!   In-memory backends with outage injection for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use feedgate_store::{CounterStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("feedgate.db").unwrap();
//!     store.incr_by("endpoint:/detail/news:R7/user:U2", 1).await.unwrap();
//!     let drained = store.get_del("endpoint:/detail/news:R7/user:U2").await.unwrap();
//!     assert_eq!(drained, Some(1));
//! }
//! ```

pub mod backends;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use backends::Backends;
pub use error::{Result, StoreError};
pub use memory::{MemoryBlobStore, MemoryCounters, MemoryKv, MemoryRecords};
pub use sqlite::SqliteStore;
pub use traits::{
    BlobStore, CounterStore, KeyValueStore, Reachable, StoredObject, SubjectDocument,
    SystemOfRecord,
};
