//! Error types for the application layer.

use feedgate_auth::AuthError;
use thiserror::Error;

/// Errors surfaced by the request guard and application context.
#[derive(Debug, Error)]
pub enum AppError {
    /// The request carried no credential.
    #[error("credential missing")]
    CredentialMissing,

    /// The credential belongs to no registered subject.
    #[error("subject does not exist")]
    SubjectUnknown,

    /// The subject exists but lacks the required entitlement.
    #[error("subject is not entitled")]
    NotEntitled,

    /// The request came without a client address.
    #[error("client address unavailable")]
    ClientAddressMissing,

    /// Authorization error.
    #[error("authorization error: {0}")]
    Auth(#[from] AuthError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// HTTP status a front end should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::CredentialMissing | AppError::SubjectUnknown => 404,
            AppError::NotEntitled => 403,
            AppError::Auth(AuthError::CredentialMissing) => 404,
            AppError::Auth(AuthError::RecordLookupTransientFailure(_)) => 503,
            _ => 500,
        }
    }
}

/// Result type for application operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use feedgate_store::StoreError;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(AppError::CredentialMissing.http_status(), 404);
        assert_eq!(AppError::SubjectUnknown.http_status(), 404);
        assert_eq!(AppError::NotEntitled.http_status(), 403);
        assert_eq!(AppError::ClientAddressMissing.http_status(), 500);

        let outage = AuthError::RecordLookupTransientFailure(StoreError::Unavailable("down".into()));
        assert_eq!(AppError::from(outage).http_status(), 503);
        let blocklist = AuthError::BlocklistUpdate(StoreError::Unavailable("down".into()));
        assert_eq!(AppError::from(blocklist).http_status(), 500);
        assert_eq!(AppError::Config("bad".into()).http_status(), 500);
    }
}
