//! Cache-aside store of subject status records.

use std::sync::Arc;
use std::time::Duration;

use feedgate_core::{status_key, Credential, StatusRecord};
use feedgate_store::KeyValueStore;
use tracing::{debug, warn};

use crate::error::{AuthError, Result};

/// Default lifetime of a cached status record.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a cache read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(StatusRecord),
    Miss,
}

/// Status records cached under `apikey:<credential>` with a fixed TTL.
///
/// Reads never fail: an unreachable store or an undecodable value is
/// logged and reported as [`CacheLookup::Miss`]. There is no invalidation;
/// records expire passively.
pub struct StatusCache<K: KeyValueStore + ?Sized> {
    store: Arc<K>,
    ttl: Duration,
}

impl<K: KeyValueStore + ?Sized> StatusCache<K> {
    pub fn new(store: Arc<K>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Lifetime applied to every write.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, credential: &Credential) -> CacheLookup {
        let key = status_key(credential);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match StatusRecord::from_json(&raw) {
                Ok(record) => {
                    debug!(?credential, ?record, "status cache hit");
                    CacheLookup::Hit(record)
                }
                Err(error) => {
                    warn!(?credential, %error, "undecodable cached status, treating as miss");
                    CacheLookup::Miss
                }
            },
            Ok(None) => CacheLookup::Miss,
            Err(error) => {
                warn!(?credential, %error, "status cache unavailable, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    pub async fn set(&self, credential: &Credential, record: StatusRecord) -> Result<()> {
        let value = record.to_json()?;
        self.store
            .set(&status_key(credential), &value, Some(self.ttl))
            .await
            .map_err(AuthError::CacheWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedgate_store::MemoryKv;

    fn credential(raw: &str) -> Credential {
        Credential::parse(Some(raw)).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_hit() {
        let kv = Arc::new(MemoryKv::new());
        let cache = StatusCache::new(Arc::clone(&kv), DEFAULT_STATUS_TTL);

        assert_eq!(cache.get(&credential("U2")).await, CacheLookup::Miss);
        cache
            .set(&credential("U2"), StatusRecord::registered(true))
            .await
            .unwrap();

        assert_eq!(
            cache.get(&credential("U2")).await,
            CacheLookup::Hit(StatusRecord::registered(true))
        );
        assert_eq!(
            kv.get("apikey:U2").await.unwrap().as_deref(),
            Some(r#"{"exists":true,"premium":true}"#)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let kv = Arc::new(MemoryKv::new());
        let cache = StatusCache::new(kv, Duration::from_secs(60));
        cache
            .set(&credential("U1"), StatusRecord::UNKNOWN)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(
            cache.get(&credential("U1")).await,
            CacheLookup::Hit(StatusRecord::UNKNOWN)
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&credential("U1")).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_garbage_value_is_a_miss() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("apikey:U3", "{not json", None).await.unwrap();
        let cache = StatusCache::new(kv, DEFAULT_STATUS_TTL);

        assert_eq!(cache.get(&credential("U3")).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let kv = Arc::new(MemoryKv::new());
        let cache = StatusCache::new(Arc::clone(&kv), DEFAULT_STATUS_TTL);
        kv.set_unavailable(true);

        assert_eq!(cache.get(&credential("U2")).await, CacheLookup::Miss);
        assert!(matches!(
            cache.set(&credential("U2"), StatusRecord::UNKNOWN).await,
            Err(AuthError::CacheWrite(_))
        ));
    }
}
