//! # Feedgate Core
//!
//! Pure primitives for the feedgate authorization and metering pipeline.
//!
//! This crate contains no I/O, no storage, no networking. It defines the
//! shapes that cross the store boundary and the codecs that keep them
//! stable:
//!
//! ## Key Types
//!
//! - [`Credential`] - Opaque subject credential taken from a request header
//! - [`SubjectId`] / [`ResourceId`] - Identifiers that can be embedded in counter keys
//! - [`StatusRecord`] - Cached `{exists, premium}` status of a subject
//! - [`CounterKey`] - Composite `(resource, subject)` access counter key
//! - [`ArchivalBatch`] - Per-subject batch of drained counts
//!
//! ## Wire Formats
//!
//! ```text
//! counter key:    endpoint:/detail/news:<resource>/user:<subject>
//! status key:     apikey:<credential>
//! archive object: <subject>/detail-log-<%Y-%m-%dT%H-%M-%S>.json
//! ```

pub mod archive;
pub mod clock;
pub mod duration_secs;
pub mod error;
pub mod key;
pub mod path;
pub mod status;
pub mod types;

pub use archive::{
    app_log_object_name, archive_object_name, ArchivalBatch, ArchiveEntry, ARCHIVE_CONTENT_TYPE,
    LOG_CONTENT_TYPE,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use key::{CounterKey, COUNTER_NAMESPACE};
pub use path::detail_resource;
pub use status::{status_key, StatusRecord, ENTITLEMENT_FIELD, STATUS_KEY_PREFIX};
pub use types::{Credential, ResourceId, SubjectId};
