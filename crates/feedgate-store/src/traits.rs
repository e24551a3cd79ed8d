//! Store traits: the abstract interfaces for every external store.
//!
//! Four collaborators sit behind these traits:
//!
//! - [`KeyValueStore`]: fast TTL'd string store (status cache, blocklist cache)
//! - [`CounterStore`]: atomic counters plus the drain lease
//! - [`SystemOfRecord`]: authoritative subject documents and blocked addresses
//! - [`BlobStore`]: create-only object storage for archives and shipped logs
//!
//! All methods are async so network-backed clients and SQLite (through
//! `spawn_blocking`) fit the same shape.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use feedgate_core::ENTITLEMENT_FIELD;

use crate::error::Result;

/// A store that can report whether it is reachable.
#[async_trait]
pub trait Reachable: Send + Sync {
    /// Round-trip to the store. `Ok` means it answered.
    async fn ping(&self) -> Result<()>;
}

/// String key-value store with per-entry expiry.
#[async_trait]
pub trait KeyValueStore: Reachable {
    /// Get a live (unexpired) value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, replacing any existing one. `None` TTL never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Whether a live value exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Counter store used for access metering.
///
/// # Atomicity
///
/// - `incr_by` is an atomic read-modify-write; concurrent increments commute.
/// - `get_del` reads and removes a counter in one step. An increment that
///   races with it lands either in the returned value or in a fresh counter,
///   never in both and never in neither.
/// - `try_acquire_lease` is an atomic compare-and-set on the lease row.
#[async_trait]
pub trait CounterStore: Reachable {
    /// Add `delta` to a counter, creating it at zero first. Returns the new value.
    async fn incr_by(&self, key: &str, delta: u64) -> Result<u64>;

    /// Read a counter without modifying it.
    async fn peek(&self, key: &str) -> Result<Option<u64>>;

    /// List counter keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomically read and delete a counter.
    async fn get_del(&self, key: &str) -> Result<Option<u64>>;

    /// Claim the named lease for `ttl` unless another holder has a live claim.
    ///
    /// Re-acquiring a lease already held by `holder` extends it.
    async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Release the lease if `holder` still owns it.
    async fn release_lease(&self, name: &str, holder: &str) -> Result<bool>;
}

/// A subject document from the system of record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubjectDocument {
    pub fields: Map<String, Value>,
}

impl SubjectDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Document with the entitlement flag set.
    pub fn with_entitlement(self, entitled: bool) -> Self {
        self.with_field(ENTITLEMENT_FIELD, Value::Bool(entitled))
    }

    /// The entitlement flag, if present and boolean.
    pub fn entitlement(&self) -> Option<bool> {
        self.fields.get(ENTITLEMENT_FIELD).and_then(Value::as_bool)
    }
}

/// The durable, authoritative document store.
#[async_trait]
pub trait SystemOfRecord: Send + Sync {
    /// Fetch the document for a credential. `Ok(None)` is an authoritative "not found".
    async fn fetch_subject(&self, credential: &str) -> Result<Option<SubjectDocument>>;

    /// Whether an address has been recorded as blocked.
    async fn is_address_blocked(&self, address: &str) -> Result<bool>;

    /// Record an address as blocked.
    async fn record_blocked_address(&self, address: &str, at: DateTime<Utc>) -> Result<()>;
}

/// An object held by a [`BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub name: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Create-only object storage.
#[async_trait]
pub trait BlobStore: Reachable {
    /// Create the bucket if missing. Returns `true` when it was created.
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool>;

    /// Store a new object.
    ///
    /// Fails with `ObjectExists` if the name is taken and with
    /// `BucketNotFound` if the bucket was never provisioned.
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<()>;

    async fn get_object(&self, bucket: &str, name: &str) -> Result<Option<StoredObject>>;

    /// Names of objects in `bucket` starting with `prefix`, sorted.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entitlement_field() {
        assert_eq!(SubjectDocument::new().entitlement(), None);
        assert_eq!(
            SubjectDocument::new().with_entitlement(true).entitlement(),
            Some(true)
        );
        let malformed = SubjectDocument::new().with_field(ENTITLEMENT_FIELD, Value::from("yes"));
        assert_eq!(malformed.entitlement(), None);
    }
}
