//! Serde helper for durations written as whole seconds in config files.
//!
//! ```
//! use std::time::Duration;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Settings {
//!     #[serde(with = "feedgate_core::duration_secs")]
//!     ttl: Duration,
//! }
//!
//! let settings: Settings = serde_json::from_str(r#"{"ttl": 90}"#).unwrap();
//! assert_eq!(settings.ttl, Duration::from_secs(90));
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}
