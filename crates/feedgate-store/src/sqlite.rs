//! SQLite implementation of the store traits.
//!
//! A single-file durable backend for running feedgate without external
//! services. It uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. Atomicity comes from SQLite itself:
//! increments are single `INSERT .. ON CONFLICT .. RETURNING` statements,
//! fetch-and-clear is `DELETE .. RETURNING`, and lease acquisition is a
//! conditional upsert.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    BlobStore, CounterStore, KeyValueStore, Reachable, StoredObject, SubjectDocument,
    SystemOfRecord,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Add or replace a subject document.
    pub async fn insert_subject(&self, credential: &str, document: SubjectDocument) -> Result<()> {
        let credential = credential.to_string();
        let document = serde_json::to_string(&Value::Object(document.fields))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO subjects (credential, document) VALUES (?1, ?2)
                 ON CONFLICT(credential) DO UPDATE SET document = excluded.document",
                params![credential, document],
            )?;
            Ok(())
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("sqlite connection: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn to_sql_count(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidData(format!("count {} overflows", value)))
}

fn from_sql_count(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidData(format!("negative count {}", value)))
}

#[async_trait]
impl Reachable for SqliteStore {
    async fn ping(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT value FROM kv
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl_millis(ttl)));
            conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(KeyValueStore::get(self, key).await?.is_some())
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn incr_by(&self, key: &str, delta: u64) -> Result<u64> {
        let key = key.to_string();
        let delta = to_sql_count(delta)?;
        self.run(move |conn| {
            let value: i64 = conn.query_row(
                "INSERT INTO counters (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = value + excluded.value
                 RETURNING value",
                params![key, delta],
                |row| row.get(0),
            )?;
            from_sql_count(value)
        })
        .await
    }

    async fn peek(&self, key: &str) -> Result<Option<u64>> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT value FROM counters WHERE key = ?1",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(from_sql_count)
            .transpose()
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM counters
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn get_del(&self, key: &str) -> Result<Option<u64>> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row(
                "DELETE FROM counters WHERE key = ?1 RETURNING value",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(from_sql_count)
            .transpose()
        })
        .await
    }

    async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let name = name.to_string();
        let holder = holder.to_string();
        self.run(move |conn| {
            let now = now_millis();
            let changed = conn.execute(
                "INSERT INTO leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET holder = excluded.holder,
                                                 expires_at = excluded.expires_at
                 WHERE leases.expires_at <= ?4 OR leases.holder = excluded.holder",
                params![name, holder, now.saturating_add(ttl_millis(ttl)), now],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        let name = name.to_string();
        let holder = holder.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
                params![name, holder],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl SystemOfRecord for SqliteStore {
    async fn fetch_subject(&self, credential: &str) -> Result<Option<SubjectDocument>> {
        let credential = credential.to_string();
        let raw: Option<String> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT document FROM subjects WHERE credential = ?1",
                    params![credential],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;

        raw.map(|raw| {
            serde_json::from_str::<Map<String, Value>>(&raw)
                .map(|fields| SubjectDocument { fields })
                .map_err(|e| StoreError::InvalidData(format!("subject document: {}", e)))
        })
        .transpose()
    }

    async fn is_address_blocked(&self, address: &str) -> Result<bool> {
        let address = address.to_string();
        self.run(move |conn| {
            let blocked = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM blocked_addresses WHERE address = ?1)",
                params![address],
                |row| row.get(0),
            )?;
            Ok(blocked)
        })
        .await
    }

    async fn record_blocked_address(&self, address: &str, at: DateTime<Utc>) -> Result<()> {
        let address = address.to_string();
        let at = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blocked_addresses (address, blocked_at) VALUES (?1, ?2)",
                params![address, at],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BlobStore for SqliteStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool> {
        let bucket = bucket.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?1, ?2)",
                params![bucket, now_millis()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let bucket = bucket.to_string();
        let name = name.to_string();
        let content_type = content_type.to_string();
        self.run(move |conn| {
            let bucket_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM buckets WHERE name = ?1)",
                params![bucket],
                |row| row.get(0),
            )?;
            if !bucket_exists {
                return Err(StoreError::BucketNotFound(bucket));
            }

            let changed = conn.execute(
                "INSERT OR IGNORE INTO objects (bucket, name, content_type, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![bucket, name, content_type, body.as_ref(), now_millis()],
            )?;
            if changed == 0 {
                return Err(StoreError::ObjectExists { bucket, name });
            }
            Ok(())
        })
        .await
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<Option<StoredObject>> {
        let bucket = bucket.to_string();
        let name = name.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT bucket, name, content_type, body FROM objects
                 WHERE bucket = ?1 AND name = ?2",
                params![bucket, name],
                |row| {
                    Ok(StoredObject {
                        bucket: row.get(0)?,
                        name: row.get(1)?,
                        content_type: row.get(2)?,
                        body: Bytes::from(row.get::<_, Vec<u8>>(3)?),
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM objects
                 WHERE bucket = ?1 AND substr(name, 1, length(?2)) = ?2
                 ORDER BY name",
            )?;
            let names = stmt
                .query_map(params![bucket, prefix], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_ping() {
        let store = SqliteStore::open_memory().unwrap();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_kv_set_get_and_expiry() {
        let store = SqliteStore::open_memory().unwrap();

        store
            .set("apikey:U1", r#"{"exists":false,"premium":false}"#, None)
            .await
            .unwrap();
        assert!(store.exists("apikey:U1").await.unwrap());

        store
            .set("apikey:U1", "replaced", Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(KeyValueStore::get(&store, "apikey:U1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_increment_and_get_del() {
        let store = SqliteStore::open_memory().unwrap();
        let key = "endpoint:/detail/news:R7/user:U2";

        assert_eq!(store.incr_by(key, 1).await.unwrap(), 1);
        assert_eq!(store.incr_by(key, 2).await.unwrap(), 3);
        assert_eq!(store.peek(key).await.unwrap(), Some(3));

        assert_eq!(store.get_del(key).await.unwrap(), Some(3));
        assert_eq!(store.get_del(key).await.unwrap(), None);
        assert_eq!(store.peek(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_literal() {
        let store = SqliteStore::open_memory().unwrap();
        store.incr_by("endpoint:/detail/news:R1/user:U1", 1).await.unwrap();
        store.incr_by("endpoint:/detail/news:R2/user:U2", 1).await.unwrap();
        store.incr_by("endpoint:/detail/newsXR3/user:U3", 1).await.unwrap();
        store.incr_by("endpoint_/detail/news:R4/user:U4", 1).await.unwrap();

        let keys = store.scan_prefix("endpoint:/detail/news:").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "endpoint:/detail/news:R1/user:U1".to_string(),
                "endpoint:/detail/news:R2/user:U2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_lease() {
        let store = SqliteStore::open_memory().unwrap();
        let minute = Duration::from_secs(60);

        assert!(store.try_acquire_lease("drain", "a", minute).await.unwrap());
        assert!(!store.try_acquire_lease("drain", "b", minute).await.unwrap());
        assert!(store.try_acquire_lease("drain", "a", minute).await.unwrap());

        assert!(!store.release_lease("drain", "b").await.unwrap());
        assert!(store.release_lease("drain", "a").await.unwrap());
        assert!(store.try_acquire_lease("drain", "b", minute).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store
            .try_acquire_lease("drain", "a", Duration::ZERO)
            .await
            .unwrap());
        assert!(store
            .try_acquire_lease("drain", "b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_blob_objects() {
        let store = SqliteStore::open_memory().unwrap();
        let body = Bytes::from_static(br#"[{"newsID":"R7"}]"#);

        assert!(matches!(
            store
                .put_object("user-logs", "U2/a.json", body.clone(), "application/json")
                .await,
            Err(StoreError::BucketNotFound(_))
        ));

        assert!(store.ensure_bucket("user-logs").await.unwrap());
        assert!(!store.ensure_bucket("user-logs").await.unwrap());

        store
            .put_object("user-logs", "U2/a.json", body.clone(), "application/json")
            .await
            .unwrap();
        assert!(matches!(
            store
                .put_object("user-logs", "U2/a.json", body.clone(), "application/json")
                .await,
            Err(StoreError::ObjectExists { .. })
        ));

        let stored = store.get_object("user-logs", "U2/a.json").await.unwrap().unwrap();
        assert_eq!(stored.body, body);
        assert_eq!(stored.content_type, "application/json");
        assert_eq!(
            store.list_objects("user-logs", "U2/").await.unwrap(),
            vec!["U2/a.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_subjects_and_blocked_addresses() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.fetch_subject("U1").await.unwrap(), None);

        let doc = SubjectDocument::new().with_entitlement(true);
        store.insert_subject("U2", doc.clone()).await.unwrap();
        assert_eq!(store.fetch_subject("U2").await.unwrap(), Some(doc));

        assert!(!store.is_address_blocked("10.0.0.9").await.unwrap());
        store
            .record_blocked_address("10.0.0.9", Utc::now())
            .await
            .unwrap();
        store
            .record_blocked_address("10.0.0.9", Utc::now())
            .await
            .unwrap();
        assert!(store.is_address_blocked("10.0.0.9").await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedgate.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.incr_by("k", 5).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_del("k").await.unwrap(), Some(5));
    }

    proptest! {
        #[test]
        fn test_get_del_returns_sum_of_increments(deltas in prop::collection::vec(1u64..1000, 1..20)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let drained = rt.block_on(async {
                let store = SqliteStore::open_memory().unwrap();
                for delta in &deltas {
                    store.incr_by("k", *delta).await.unwrap();
                }
                store.get_del("k").await.unwrap()
            });
            prop_assert_eq!(drained, Some(deltas.iter().sum::<u64>()));
        }
    }
}
