//! # Feedgate Meter
//!
//! Usage metering for feedgate.
//!
//! ## Overview
//!
//! Authorized accesses to detail resources are counted per
//! `(resource, subject)` pair in the counter store. The counts are later
//! harvested by the archival drainer and written to blob storage, one
//! object per subject per cycle.
//!
//! ## Key Types
//!
//! - [`AccessMeter`] - Non-blocking increments through a bounded queue
//! - [`ArchivalDrainer`] - Periodic fetch-and-clear, grouping and upload
//! - [`DrainLease`] - Keeps concurrent drainers from overlapping
//! - [`LogShipper`] - Periodic upload of the service log file
//!
//! ## Guarantees
//!
//! - Every counted unit is drained by at most one cycle.
//! - A failed upload adds its counts back, so nothing is lost unless the
//!   process dies between clearing and restoring.
//! - Only one drainer per lease period touches the namespace.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedgate_core::{ResourceId, SubjectId, SystemClock};
//! use feedgate_meter::{AccessMeter, ArchivalDrainer, DrainConfig, MeterConfig};
//! use feedgate_store::{MemoryBlobStore, MemoryCounters};
//!
//! async fn example() {
//!     let counters = Arc::new(MemoryCounters::new());
//!     let meter = AccessMeter::start(Arc::clone(&counters), MeterConfig::default());
//!     meter.record(ResourceId::new("R7").unwrap(), SubjectId::new("U2").unwrap());
//!     meter.shutdown().await;
//!
//!     let drainer = ArchivalDrainer::new(
//!         counters,
//!         Arc::new(MemoryBlobStore::new()),
//!         Arc::new(SystemClock),
//!         DrainConfig::default(),
//!     );
//!     let report = drainer.drain_once().await;
//!     println!("archived {} units", report.units_archived);
//! }
//! ```

pub mod drain;
pub mod error;
pub mod lease;
pub mod meter;
pub mod shipper;

pub use drain::{ArchivalDrainer, DrainConfig, DrainReport, SkipReason, QUARANTINE_PREFIX};
pub use error::{MeterError, Result};
pub use lease::DrainLease;
pub use meter::{AccessMeter, Dispatch, MeterConfig, MeterStats};
pub use shipper::{LogShipConfig, LogShipper};
