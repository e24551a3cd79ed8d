//! Access counter keys.
//!
//! A counter key names one `(resource, subject)` pair inside the fixed
//! counter namespace:
//!
//! ```text
//! endpoint:/detail/news:<resource>/user:<subject>
//! ```
//!
//! The drainer decodes keys positionally: split on `/` into exactly four
//! segments, then strip the `news:` and `user:` literals. Because neither
//! identifier may contain `/`, encoding then decoding always yields the
//! original pair.

use std::fmt;

use crate::error::{CoreError, Result};
use crate::types::{ResourceId, SubjectId};

/// Prefix shared by every access counter key. Drain scans match on this.
pub const COUNTER_NAMESPACE: &str = "endpoint:/detail/news:";

const ENDPOINT_SEGMENT: &str = "endpoint:";
const DETAIL_SEGMENT: &str = "detail";
const RESOURCE_PREFIX: &str = "news:";
const SUBJECT_PREFIX: &str = "user:";

/// Composite key of an access counter.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub resource: ResourceId,
    pub subject: SubjectId,
}

impl CounterKey {
    pub fn new(resource: ResourceId, subject: SubjectId) -> Self {
        Self { resource, subject }
    }

    /// Encode into the store key.
    pub fn encode(&self) -> String {
        format!(
            "{}{}/{}{}",
            COUNTER_NAMESPACE, self.resource, SUBJECT_PREFIX, self.subject
        )
    }

    /// Decode a store key produced by [`CounterKey::encode`].
    pub fn decode(key: &str) -> Result<Self> {
        let malformed = |reason| CoreError::MalformedKey {
            key: key.to_string(),
            reason,
        };

        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() != 4 {
            return Err(malformed("expected 4 '/'-separated segments"));
        }
        if parts[0] != ENDPOINT_SEGMENT || parts[1] != DETAIL_SEGMENT {
            return Err(malformed("outside the counter namespace"));
        }

        let resource = parts[2]
            .strip_prefix(RESOURCE_PREFIX)
            .ok_or_else(|| malformed("missing 'news:' segment"))?;
        let subject = parts[3]
            .strip_prefix(SUBJECT_PREFIX)
            .ok_or_else(|| malformed("missing 'user:' segment"))?;

        Ok(Self {
            resource: ResourceId::new(resource).map_err(|_| malformed("empty resource id"))?,
            subject: SubjectId::new(subject).map_err(|_| malformed("empty subject id"))?,
        })
    }
}

impl fmt::Debug for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CounterKey({})", self.encode())
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
