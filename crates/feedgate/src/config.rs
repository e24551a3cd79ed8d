//! Application configuration.
//!
//! Every field has a default matching the production deployment, so a
//! config file only needs the values that differ:
//!
//! ```json
//! {
//!   "gate": { "require_entitlement": true },
//!   "drain": { "interval": 600 },
//!   "log_shipping": { "enabled": true, "file": "/var/log/feed-api.log" },
//!   "database": "/var/lib/feedgate/feedgate.db"
//! }
//! ```
//!
//! Durations are whole seconds.

use std::path::{Path, PathBuf};

use feedgate_auth::{BlocklistConfig, GateConfig};
use feedgate_meter::{DrainConfig, LogShipConfig, MeterConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gate: GateConfig,
    pub meter: MeterConfig,
    pub drain: DrainConfig,
    pub blocklist: BlocklistConfig,
    pub log_shipping: LogShipConfig,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// SQLite database backing every store. `None` keeps stores in memory.
    pub database: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            meter: MeterConfig::default(),
            drain: DrainConfig::default(),
            blocklist: BlocklistConfig::default(),
            log_shipping: LogShipConfig::default(),
            log_level: "info".to_string(),
            database: None,
        }
    }
}

impl AppConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.meter.workers == 0 {
            return Err(AppError::Config("meter.workers must be at least 1".into()));
        }
        if self.meter.queue_capacity == 0 {
            return Err(AppError::Config("meter.queue_capacity must be at least 1".into()));
        }
        if self.drain.interval.is_zero() {
            return Err(AppError::Config("drain.interval must be positive".into()));
        }
        if self.drain.lease_ttl.is_zero() {
            return Err(AppError::Config("drain.lease_ttl must be positive".into()));
        }
        if self.log_shipping.enabled && self.log_shipping.interval.is_zero() {
            return Err(AppError::Config("log_shipping.interval must be positive".into()));
        }
        if self.gate.header.is_empty() {
            return Err(AppError::Config("gate.header must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_meter(mut self, meter: MeterConfig) -> Self {
        self.meter = meter;
        self
    }

    pub fn with_drain(mut self, drain: DrainConfig) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_blocklist(mut self, blocklist: BlocklistConfig) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn with_log_shipping(mut self, log_shipping: LogShipConfig) -> Self {
        self.log_shipping = log_shipping;
        self
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }
}
