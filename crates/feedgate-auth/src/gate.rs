//! The authorization gate.
//!
//! Resolution order for a presented credential:
//!
//! 1. Status cache hit: the cached record is returned as-is.
//! 2. Miss (or cache unreachable): the system of record decides.
//!    - no document: `{exists: false, premium: false}`
//!    - document without a boolean `premium-status`: `{exists: true, premium: false}`
//!    - document with `premium-status`: `{exists: true, premium: <value>}`
//! 3. The resolved record is written back with the cache TTL. A failed
//!    write is logged and does not change the decision.
//!
//! A lookup failure other than "not found" denies the request and caches
//! nothing, so the next request retries the system of record.

use std::sync::Arc;
use std::time::Duration;

use feedgate_core::{Credential, StatusRecord};
use feedgate_store::{KeyValueStore, SystemOfRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::cache::{CacheLookup, StatusCache, DEFAULT_STATUS_TTL};
use crate::error::{AuthError, Result};

/// Header carrying the credential.
pub const CREDENTIAL_HEADER: &str = "X-API-Key";

/// Configuration for the authorization gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Request header carrying the credential.
    pub header: String,
    /// Lifetime of cached status records.
    #[serde(with = "feedgate_core::duration_secs")]
    pub status_ttl: Duration,
    /// Path prefix in front of versioned routes, e.g. `/api/v2`.
    pub version_prefix: String,
    /// Reject registered subjects without the entitlement flag.
    pub require_entitlement: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            header: CREDENTIAL_HEADER.to_string(),
            status_ttl: DEFAULT_STATUS_TTL,
            version_prefix: "/api/v2".to_string(),
            require_entitlement: false,
        }
    }
}

impl GateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    pub fn with_version_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.version_prefix = prefix.into();
        self
    }

    pub fn with_require_entitlement(mut self, required: bool) -> Self {
        self.require_entitlement = required;
        self
    }
}

/// Resolves a credential to a [`StatusRecord`].
pub struct AuthorizationGate<K, R>
where
    K: KeyValueStore + ?Sized,
    R: SystemOfRecord + ?Sized,
{
    cache: StatusCache<K>,
    records: Arc<R>,
}

impl<K, R> AuthorizationGate<K, R>
where
    K: KeyValueStore + ?Sized,
    R: SystemOfRecord + ?Sized,
{
    pub fn new(cache_store: Arc<K>, records: Arc<R>, status_ttl: Duration) -> Self {
        Self {
            cache: StatusCache::new(cache_store, status_ttl),
            records,
        }
    }

    pub fn cache(&self) -> &StatusCache<K> {
        &self.cache
    }

    /// Authorize a raw header value.
    ///
    /// An absent or empty credential fails with
    /// [`AuthError::CredentialMissing`] before any store is touched.
    pub async fn authorize(&self, credential: Option<&str>) -> Result<StatusRecord> {
        let credential =
            Credential::parse(credential).map_err(|_| AuthError::CredentialMissing)?;
        self.authorize_credential(&credential).await
    }

    pub async fn authorize_credential(&self, credential: &Credential) -> Result<StatusRecord> {
        if let CacheLookup::Hit(record) = self.cache.get(credential).await {
            return Ok(record);
        }

        let record = self.resolve(credential).await?;
        if let Err(error) = self.cache.set(credential, record).await {
            warn!(?credential, %error, "failed to cache subject status");
        }
        Ok(record)
    }

    async fn resolve(&self, credential: &Credential) -> Result<StatusRecord> {
        match self.records.fetch_subject(credential.as_str()).await {
            Ok(None) => {
                debug!(?credential, "no subject document");
                Ok(StatusRecord::UNKNOWN)
            }
            Ok(Some(document)) => {
                let entitled = document.entitlement();
                if entitled.is_none() {
                    debug!(?credential, "subject document has no entitlement flag");
                }
                Ok(StatusRecord::registered(entitled.unwrap_or(false)))
            }
            Err(err) => {
                error!(?credential, error = %err, "subject record lookup failed");
                Err(AuthError::RecordLookupTransientFailure(err))
            }
        }
    }
}
