//! Error types for feedgate core.

use thiserror::Error;

/// Errors produced by the pure codecs in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No credential was presented, or it was empty.
    #[error("credential missing")]
    CredentialMissing,

    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    /// A counter key did not match `endpoint:/detail/news:<r>/user:<s>`.
    #[error("malformed counter key {key:?}: {reason}")]
    MalformedKey { key: String, reason: &'static str },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
