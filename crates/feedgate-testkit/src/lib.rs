//! # Feedgate Testkit
//!
//! Testing utilities for feedgate.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: In-memory stores with fault injection and a manual clock
//! - **Generators**: Proptest strategies for identifiers, keys and access plans
//!
//! ## Test Fixtures
//!
//! ```rust
//! use feedgate_testkit::TestBackends;
//!
//! let test = TestBackends::new();
//! test.register("U2", Some(true));
//! let backends = test.backends();
//! # let _ = backends;
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use feedgate_testkit::generators::{access_plan, AccessParams};
//!
//! proptest! {
//!     #[test]
//!     fn drains_conserve_counts(plan in access_plan(32)) {
//!         let total: u64 = plan.iter().map(|a| a.count).sum();
//!         // ... record, drain, compare with archived total
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use feedgate_core::ManualClock;
pub use fixtures::{counter_key, fixed_instant, TestBackends};
pub use generators::{access_plan, AccessParams};
