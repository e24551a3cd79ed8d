//! # Feedgate
//!
//! Authorization cache and usage-metering pipeline for the news feed
//! services.
//!
//! ## Overview
//!
//! ```text
//! request ─► RequestGuard ─► AuthorizationGate ─► StatusCache ─(miss)─► SystemOfRecord
//!                 │
//!                 ├─► handler
//!                 └─► AccessMeter ─► counter store ◄─ ArchivalDrainer ─► blob store
//! ```
//!
//! - Every request is authorized against its `X-API-Key` credential. Both
//!   positive and negative answers are cached for 24 hours.
//! - Authorized reads of `/api/v2/detail/<id>` are counted per
//!   `(resource, subject)` without blocking the request.
//! - Every 30 minutes the drainer moves the counts into one JSON object per
//!   subject in the `user-logs` bucket.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use feedgate::{AppConfig, AppContext, InboundRequest};
//! use feedgate::store::Backends;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = AppConfig::load("feedgate.json")?;
//!     feedgate::telemetry::init_tracing(&config.log_level, None)?;
//!
//!     let backends = match &config.database {
//!         Some(path) => Backends::sqlite(path)?,
//!         None => Backends::in_memory(),
//!     };
//!     let app = AppContext::start(config, backends).await?;
//!
//!     let guard = app.guard();
//!     let request = InboundRequest::new("/api/v2/detail/R7").with_header("X-API-Key", "U2");
//!     let body = guard.handle(&request, |_status| async { "article" }).await;
//!     println!("{:?}", body.map_err(|e| e.http_status()));
//!
//!     app.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `feedgate::core` - Identifiers, status records, key and object formats
//! - `feedgate::store` - Store traits and backends
//! - `feedgate::auth` - Status cache, authorization gate, blocklist
//! - `feedgate::meter` - Access meter, drainer, log shipper

pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod telemetry;

// Re-export component crates
pub use feedgate_auth as auth;
pub use feedgate_core as core;
pub use feedgate_meter as meter;
pub use feedgate_store as store;

pub use config::AppConfig;
pub use context::{AppContext, Drainer};
pub use error::{AppError, Result};
pub use guard::{InboundRequest, RequestGuard};
