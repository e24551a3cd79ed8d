//! # Feedgate Auth
//!
//! Request-path authorization for feedgate.
//!
//! ## Overview
//!
//! Every request carries a credential. The [`AuthorizationGate`] resolves it
//! to a [`StatusRecord`](feedgate_core::StatusRecord) by consulting the
//! [`StatusCache`] first and the system of record on a miss. Negative
//! answers are cached just like positive ones, so an unknown credential
//! costs one record lookup per TTL window.
//!
//! The [`Blocklist`] keeps addresses that probed unknown routes out of the
//! service.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedgate_auth::{AuthorizationGate, GateConfig};
//! use feedgate_store::{MemoryKv, MemoryRecords};
//!
//! async fn example() {
//!     let config = GateConfig::default();
//!     let gate = AuthorizationGate::new(
//!         Arc::new(MemoryKv::new()),
//!         Arc::new(MemoryRecords::new()),
//!         config.status_ttl,
//!     );
//!     let status = gate.authorize(Some("U1")).await.unwrap();
//!     assert!(!status.exists);
//! }
//! ```

pub mod blocklist;
pub mod cache;
pub mod error;
pub mod gate;

pub use blocklist::{BlockOutcome, Blocklist, BlocklistConfig, BLOCKED_KEY_PREFIX};
pub use cache::{CacheLookup, StatusCache, DEFAULT_STATUS_TTL};
pub use error::{AuthError, Result};
pub use gate::{AuthorizationGate, GateConfig, CREDENTIAL_HEADER};
