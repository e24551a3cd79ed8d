//! Archival batches and object naming.
//!
//! One [`ArchivalBatch`] is produced per subject per drain cycle. Its body
//! is a JSON array of entries:
//!
//! ```text
//! [{"newsID": "R7", "accessCount": "3", "lastSynced": "2024-05-01T10:00:00Z"}]
//! ```
//!
//! `accessCount` is a string on the wire, matching what downstream
//! analytics already consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{ResourceId, SubjectId};

/// Content type of archive objects.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/json";

/// Content type of shipped service logs.
pub const LOG_CONTENT_TYPE: &str = "text/plain";

/// One drained counter inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    #[serde(rename = "newsID")]
    pub resource: ResourceId,

    #[serde(rename = "accessCount", with = "count_as_string")]
    pub access_count: u64,

    #[serde(rename = "lastSynced", with = "rfc3339_seconds")]
    pub last_synced: DateTime<Utc>,
}

/// All counts drained for one subject in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivalBatch {
    pub subject: SubjectId,
    pub drained_at: DateTime<Utc>,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchivalBatch {
    pub fn new(subject: SubjectId, drained_at: DateTime<Utc>) -> Self {
        Self {
            subject,
            drained_at,
            entries: Vec::new(),
        }
    }

    /// Add a drained count.
    pub fn push(&mut self, resource: ResourceId, access_count: u64, last_synced: DateTime<Utc>) {
        self.entries.push(ArchiveEntry {
            resource,
            access_count,
            last_synced,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all access counts in the batch.
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.access_count).sum()
    }

    /// Object name for this batch. `attempt` > 0 disambiguates a name collision.
    pub fn object_name(&self, attempt: u32) -> String {
        archive_object_name(&self.subject, self.drained_at, attempt)
    }

    /// Serialize the entries as the object body.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.entries).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    /// Parse an object body back into entries.
    pub fn parse_entries(body: &[u8]) -> Result<Vec<ArchiveEntry>> {
        serde_json::from_slice(body).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

/// `<subject>/detail-log-<%Y-%m-%dT%H-%M-%S>[-<attempt>].json`
pub fn archive_object_name(subject: &SubjectId, at: DateTime<Utc>, attempt: u32) -> String {
    let stamp = at.format("%Y-%m-%dT%H-%M-%S");
    if attempt == 0 {
        format!("{}/detail-log-{}.json", subject, stamp)
    } else {
        format!("{}/detail-log-{}-{}.json", subject, stamp, attempt)
    }
}

/// `logs/<YYYY>/<MM>/<stem>_<YYYYMMDD_HHMMSS><ext>` for a shipped log file.
pub fn app_log_object_name(file_name: &str, at: DateTime<Utc>) -> String {
    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    };
    format!(
        "logs/{}/{}_{}{}",
        at.format("%Y/%m"),
        stem,
        at.format("%Y%m%d_%H%M%S"),
        ext
    )
}

mod count_as_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(count: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(count)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

mod rfc3339_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}
