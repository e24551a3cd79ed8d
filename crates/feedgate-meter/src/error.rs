//! Error types for metering and archival.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the metering pipeline.
#[derive(Debug, Error)]
pub enum MeterError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] feedgate_store::StoreError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] feedgate_core::CoreError),

    /// Reading a local file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured log path has no file name.
    #[error("log path has no file name: {}", .0.display())]
    LogFileName(PathBuf),

    /// Every candidate object name was already taken.
    #[error("no free object name for {0}")]
    NameExhausted(String),
}

/// Result type for metering operations.
pub type Result<T> = std::result::Result<T, MeterError>;
