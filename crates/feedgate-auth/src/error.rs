//! Error types for authorization.

use feedgate_store::StoreError;
use thiserror::Error;

/// Errors that can occur while authorizing a request.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("credential missing")]
    CredentialMissing,

    /// The system of record failed for a reason other than "not found".
    ///
    /// The request is denied and nothing is cached.
    #[error("subject record lookup failed: {0}")]
    RecordLookupTransientFailure(#[source] StoreError),

    /// Writing a status record to the cache failed.
    #[error("status cache write failed: {0}")]
    CacheWrite(#[source] StoreError),

    /// Recording a blocked address failed.
    #[error("blocklist update failed: {0}")]
    BlocklistUpdate(#[source] StoreError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] feedgate_core::CoreError),
}

/// Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthError>;
