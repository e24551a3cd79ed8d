//! In-memory implementations of the store traits.
//!
//! These keep the same semantics as the SQLite and networked backends but
//! hold everything in memory. Each store carries switches for injecting
//! outages so failure paths can be exercised in tests. Expiry is measured
//! with `tokio::time::Instant`, so TTLs follow a paused test clock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::error::{Result, StoreError};
use crate::traits::{
    BlobStore, CounterStore, KeyValueStore, Reachable, StoredObject, SubjectDocument,
    SystemOfRecord,
};

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|e| StoreError::Poisoned(format!("{}: {}", what, e)))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|e| StoreError::Poisoned(format!("{}: {}", what, e)))
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| StoreError::Poisoned(format!("{}: {}", what, e)))
}

/// Outage switch shared by the in-memory stores.
#[derive(Debug, Default)]
struct Outage(AtomicBool);

impl Outage {
    fn set(&self, down: bool) {
        self.0.store(down, Ordering::SeqCst);
    }

    fn check(&self, store: &str) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{} is down", store)))
        } else {
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key-value
// ─────────────────────────────────────────────────────────────────────────────

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory key-value store with TTL expiry.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, KvEntry>>,
    outage: Outage,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Reachable for MemoryKv {
    async fn ping(&self) -> Result<()> {
        self.outage.check("key-value store")
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.outage.check("key-value store")?;
        let entries = read(&self.entries, "kv")?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.outage.check("key-value store")?;
        let mut entries = write(&self.entries, "kv")?;
        entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Counters
// ─────────────────────────────────────────────────────────────────────────────

struct Lease {
    holder: String,
    expires_at: Instant,
}

#[derive(Default)]
struct CounterState {
    counters: BTreeMap<String, u64>,
    leases: HashMap<String, Lease>,
}

/// In-memory counter store.
///
/// A single mutex guards counters and leases, which makes every trait
/// operation atomic with respect to the others.
#[derive(Default)]
pub struct MemoryCounters {
    state: Mutex<CounterState>,
    outage: Outage,
    fail_increments: AtomicBool,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Make only `incr_by` fail, leaving scans and drains working.
    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all counters.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.state
            .lock()
            .map(|state| state.counters.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Reachable for MemoryCounters {
    async fn ping(&self) -> Result<()> {
        self.outage.check("counter store")
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn incr_by(&self, key: &str, delta: u64) -> Result<u64> {
        self.outage.check("counter store")?;
        if self.fail_increments.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("counter increments rejected".into()));
        }
        let mut state = lock(&self.state, "counters")?;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter = counter.saturating_add(delta);
        Ok(*counter)
    }

    async fn peek(&self, key: &str) -> Result<Option<u64>> {
        self.outage.check("counter store")?;
        let state = lock(&self.state, "counters")?;
        Ok(state.counters.get(key).copied())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.outage.check("counter store")?;
        let state = lock(&self.state, "counters")?;
        Ok(state
            .counters
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_del(&self, key: &str) -> Result<Option<u64>> {
        self.outage.check("counter store")?;
        let mut state = lock(&self.state, "counters")?;
        Ok(state.counters.remove(key))
    }

    async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.outage.check("counter store")?;
        let mut state = lock(&self.state, "leases")?;
        let now = Instant::now();

        if let Some(current) = state.leases.get(name) {
            if current.holder != holder && current.expires_at > now {
                return Ok(false);
            }
        }

        state.leases.insert(
            name.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        self.outage.check("counter store")?;
        let mut state = lock(&self.state, "leases")?;
        match state.leases.get(name) {
            Some(current) if current.holder == holder => {
                state.leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// System of record
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory system of record.
///
/// Counts subject lookups so tests can assert that cache hits never reach it.
#[derive(Default)]
pub struct MemoryRecords {
    subjects: RwLock<HashMap<String, SubjectDocument>>,
    blocked: RwLock<HashMap<String, DateTime<Utc>>>,
    lookups: AtomicUsize,
    outage: Outage,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a subject document.
    pub fn insert_subject(&self, credential: &str, document: SubjectDocument) {
        if let Ok(mut subjects) = self.subjects.write() {
            subjects.insert(credential.to_string(), document);
        }
    }

    /// Make every operation fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Number of `fetch_subject` calls so far, including failed ones.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// When an address was blocked, if it was.
    pub fn blocked_at(&self, address: &str) -> Option<DateTime<Utc>> {
        self.blocked
            .read()
            .ok()
            .and_then(|blocked| blocked.get(address).copied())
    }
}

#[async_trait]
impl SystemOfRecord for MemoryRecords {
    async fn fetch_subject(&self, credential: &str) -> Result<Option<SubjectDocument>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.outage.check("system of record")?;
        let subjects = read(&self.subjects, "subjects")?;
        Ok(subjects.get(credential).cloned())
    }

    async fn is_address_blocked(&self, address: &str) -> Result<bool> {
        self.outage.check("system of record")?;
        let blocked = read(&self.blocked, "blocked")?;
        Ok(blocked.contains_key(address))
    }

    async fn record_blocked_address(&self, address: &str, at: DateTime<Utc>) -> Result<()> {
        self.outage.check("system of record")?;
        let mut blocked = write(&self.blocked, "blocked")?;
        blocked.entry(address.to_string()).or_insert(at);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Blobs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct BlobState {
    buckets: BTreeSet<String>,
    objects: BTreeMap<(String, String), StoredObject>,
}

/// In-memory create-only object store.
#[derive(Default)]
pub struct MemoryBlobStore {
    state: RwLock<BlobState>,
    outage: Outage,
    fail_puts: AtomicBool,
    put_attempts: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Make only `put_object` fail, leaving reads working.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Number of `put_object` calls so far, including failed ones.
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Every stored object in `bucket`, ordered by name.
    pub fn objects_in(&self, bucket: &str) -> Vec<StoredObject> {
        self.state
            .read()
            .map(|state| {
                state
                    .objects
                    .values()
                    .filter(|o| o.bucket == bucket)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Reachable for MemoryBlobStore {
    async fn ping(&self) -> Result<()> {
        self.outage.check("blob store")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool> {
        self.outage.check("blob store")?;
        let mut state = write(&self.state, "blobs")?;
        Ok(state.buckets.insert(bucket.to_string()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.outage.check("blob store")?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blob store rejected upload".into()));
        }

        let mut state = write(&self.state, "blobs")?;
        if !state.buckets.contains(bucket) {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }

        let id = (bucket.to_string(), name.to_string());
        if state.objects.contains_key(&id) {
            return Err(StoreError::ObjectExists {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }

        state.objects.insert(
            id,
            StoredObject {
                bucket: bucket.to_string(),
                name: name.to_string(),
                content_type: content_type.to_string(),
                body,
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<Option<StoredObject>> {
        self.outage.check("blob store")?;
        let state = read(&self.state, "blobs")?;
        Ok(state
            .objects
            .get(&(bucket.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.outage.check("blob store")?;
        let state = read(&self.state, "blobs")?;
        Ok(state
            .objects
            .values()
            .filter(|o| o.bucket == bucket && o.name.starts_with(prefix))
            .map(|o| o.name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_kv_ttl_expiry() {
        let kv = MemoryKv::new();
        kv.set("apikey:U1", "v", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(kv.get("apikey:U1").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(kv.get("apikey:U1").await.unwrap(), None);
        assert!(!kv.exists("apikey:U1").await.unwrap());
    }

    #[tokio::test]
    async fn test_kv_outage() {
        let kv = MemoryKv::new();
        kv.set_unavailable(true);
        assert!(matches!(kv.ping().await, Err(StoreError::Unavailable(_))));
        assert!(kv.get("k").await.is_err());
        kv.set_unavailable(false);
        assert!(kv.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counter_get_del() {
        let counters = MemoryCounters::new();
        counters.incr_by("k", 1).await.unwrap();
        counters.incr_by("k", 2).await.unwrap();

        assert_eq!(counters.get_del("k").await.unwrap(), Some(3));
        assert_eq!(counters.get_del("k").await.unwrap(), None);
        assert_eq!(counters.peek("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_scan_prefix() {
        let counters = MemoryCounters::new();
        counters.incr_by("endpoint:/detail/news:R1/user:U1", 1).await.unwrap();
        counters.incr_by("endpoint:/detail/news:R2/user:U1", 1).await.unwrap();
        counters.incr_by("other:key", 1).await.unwrap();

        let keys = counters.scan_prefix("endpoint:/detail/news:").await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let counters = Arc::new(MemoryCounters::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let counters = Arc::clone(&counters);
            handles.push(tokio::spawn(async move {
                counters.incr_by("k", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counters.get_del("k").await.unwrap(), Some(64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_exclusion_and_expiry() {
        let counters = MemoryCounters::new();
        let ttl = Duration::from_secs(30);

        assert!(counters.try_acquire_lease("drain", "a", ttl).await.unwrap());
        assert!(!counters.try_acquire_lease("drain", "b", ttl).await.unwrap());
        // Holder may extend its own lease.
        assert!(counters.try_acquire_lease("drain", "a", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(counters.try_acquire_lease("drain", "b", ttl).await.unwrap());
        assert!(!counters.release_lease("drain", "a").await.unwrap());
        assert!(counters.release_lease("drain", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_records_count_lookups() {
        let records = MemoryRecords::new();
        records.insert_subject("U2", SubjectDocument::new().with_entitlement(true));

        assert!(records.fetch_subject("U1").await.unwrap().is_none());
        assert!(records.fetch_subject("U2").await.unwrap().is_some());

        records.set_unavailable(true);
        assert!(records.fetch_subject("U2").await.is_err());
        assert_eq!(records.lookup_count(), 3);
    }

    #[tokio::test]
    async fn test_blob_create_only() {
        let blobs = MemoryBlobStore::new();
        assert!(matches!(
            blobs
                .put_object("user-logs", "a.json", Bytes::from_static(b"[]"), "application/json")
                .await,
            Err(StoreError::BucketNotFound(_))
        ));

        assert!(blobs.ensure_bucket("user-logs").await.unwrap());
        assert!(!blobs.ensure_bucket("user-logs").await.unwrap());

        blobs
            .put_object("user-logs", "a.json", Bytes::from_static(b"[]"), "application/json")
            .await
            .unwrap();
        assert!(matches!(
            blobs
                .put_object("user-logs", "a.json", Bytes::from_static(b"[1]"), "application/json")
                .await,
            Err(StoreError::ObjectExists { .. })
        ));

        let stored = blobs.get_object("user-logs", "a.json").await.unwrap().unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"[]"));
        assert_eq!(blobs.list_objects("user-logs", "a").await.unwrap(), vec!["a.json"]);
    }
}
