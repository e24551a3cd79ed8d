//! Address blocklist.
//!
//! Blocked addresses live in the system of record. Positive lookups are
//! cached under `blocked-ip:<address>` for a short TTL so repeat offenders
//! are rejected without a round-trip. Negative lookups are never cached.

use std::sync::Arc;
use std::time::Duration;

use feedgate_core::Clock;
use feedgate_store::{KeyValueStore, SystemOfRecord};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AuthError, Result};

/// Prefix of blocklist cache keys.
pub const BLOCKED_KEY_PREFIX: &str = "blocked-ip:";

const BLOCKED_MARKER: &str = "blocked";

/// Configuration for the blocklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    /// Lifetime of a cached positive lookup.
    #[serde(with = "feedgate_core::duration_secs")]
    pub cache_ttl: Duration,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Result of screening a request to an unknown route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The address was already on the blocklist.
    AlreadyBlocked,
    /// The address has just been added.
    NewlyBlocked,
}

pub struct Blocklist<K, R>
where
    K: KeyValueStore + ?Sized,
    R: SystemOfRecord + ?Sized,
{
    cache: Arc<K>,
    records: Arc<R>,
    clock: Arc<dyn Clock>,
    config: BlocklistConfig,
}

fn cache_key(address: &str) -> String {
    format!("{}{}", BLOCKED_KEY_PREFIX, address)
}

impl<K, R> Blocklist<K, R>
where
    K: KeyValueStore + ?Sized,
    R: SystemOfRecord + ?Sized,
{
    pub fn new(cache: Arc<K>, records: Arc<R>, clock: Arc<dyn Clock>, config: BlocklistConfig) -> Self {
        Self {
            cache,
            records,
            clock,
            config,
        }
    }

    /// Whether `address` is blocked.
    ///
    /// Lookup failures are logged and read as "not blocked".
    pub async fn is_blocked(&self, address: &str) -> bool {
        let key = cache_key(address);
        match self.cache.exists(&key).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(error) => warn!(address, %error, "blocklist cache unavailable"),
        }

        match self.records.is_address_blocked(address).await {
            Ok(true) => {
                self.remember(&key).await;
                true
            }
            Ok(false) => false,
            Err(error) => {
                warn!(address, %error, "blocklist lookup failed, allowing address");
                false
            }
        }
    }

    /// Record `address` as blocked.
    pub async fn block(&self, address: &str) -> Result<()> {
        self.records
            .record_blocked_address(address, self.clock.now())
            .await
            .map_err(AuthError::BlocklistUpdate)?;
        self.remember(&cache_key(address)).await;
        info!(address, "address blocked");
        Ok(())
    }

    /// Handle a request to a route that does not exist.
    ///
    /// Probing unknown routes is treated as intrusion: the address is
    /// blocked unless it already was.
    pub async fn screen_unknown_route(&self, address: &str) -> Result<BlockOutcome> {
        if self.is_blocked(address).await {
            return Ok(BlockOutcome::AlreadyBlocked);
        }
        self.block(address).await?;
        Ok(BlockOutcome::NewlyBlocked)
    }

    async fn remember(&self, key: &str) {
        if let Err(error) = self
            .cache
            .set(key, BLOCKED_MARKER, Some(self.config.cache_ttl))
            .await
        {
            warn!(key, %error, "failed to cache blocked address");
        }
    }
}
