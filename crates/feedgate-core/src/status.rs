//! Cached subject status.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::Credential;

/// Prefix of status cache keys.
pub const STATUS_KEY_PREFIX: &str = "apikey:";

/// Field of a subject document holding its entitlement flag.
pub const ENTITLEMENT_FIELD: &str = "premium-status";

/// Resolved status of a subject.
///
/// Serialized as `{"exists": bool, "premium": bool}`. A cached record is
/// trusted as-is until its TTL expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub exists: bool,
    #[serde(rename = "premium")]
    pub entitled: bool,
}

impl StatusRecord {
    /// Status of a credential with no document in the system of record.
    pub const UNKNOWN: Self = Self {
        exists: false,
        entitled: false,
    };

    /// Status of a registered subject.
    pub const fn registered(entitled: bool) -> Self {
        Self {
            exists: true,
            entitled,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

/// Cache key for a credential's status: `apikey:<credential>`.
pub fn status_key(credential: &Credential) -> String {
    format!("{}{}", STATUS_KEY_PREFIX, credential.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = StatusRecord::registered(true).to_json().unwrap();
        assert_eq!(json, r#"{"exists":true,"premium":true}"#);

        let parsed = StatusRecord::from_json(r#"{"exists":false,"premium":false}"#).unwrap();
        assert_eq!(parsed, StatusRecord::UNKNOWN);
    }

    #[test]
    fn test_negative_and_unentitled_are_distinct() {
        assert_ne!(StatusRecord::UNKNOWN, StatusRecord::registered(false));
    }

    #[test]
    fn test_malformed_cached_value() {
        assert!(matches!(
            StatusRecord::from_json("not json"),
            Err(CoreError::Decoding(_))
        ));
    }

    #[test]
    fn test_status_key() {
        let credential = Credential::parse(Some("U1")).unwrap();
        assert_eq!(status_key(&credential), "apikey:U1");
    }
}
