//! Periodic upload of the service log file to blob storage.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use feedgate_core::{app_log_object_name, Clock, LOG_CONTENT_TYPE};
use feedgate_store::BlobStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{MeterError, Result};

/// Configuration for log shipping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogShipConfig {
    pub enabled: bool,
    /// Log file to upload.
    pub file: PathBuf,
    pub bucket: String,
    #[serde(with = "feedgate_core::duration_secs")]
    pub interval: Duration,
}

impl Default for LogShipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: PathBuf::from("feed-api.log"),
            bucket: "app-logs".to_string(),
            interval: Duration::from_secs(20),
        }
    }
}

impl LogShipConfig {
    pub fn enabled_for(file: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            file: file.into(),
            ..Self::default()
        }
    }
}

/// Uploads a snapshot of the log file on every tick.
pub struct LogShipper<B: BlobStore + ?Sized> {
    blobs: Arc<B>,
    clock: Arc<dyn Clock>,
    config: LogShipConfig,
}

impl<B: BlobStore + ?Sized> LogShipper<B> {
    pub fn new(blobs: Arc<B>, clock: Arc<dyn Clock>, config: LogShipConfig) -> Self {
        Self {
            blobs,
            clock,
            config,
        }
    }

    /// Upload the current log file. `Ok(None)` when the file does not exist yet.
    pub async fn ship_once(&self) -> Result<Option<String>> {
        let file_name = self
            .config
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| MeterError::LogFileName(self.config.file.clone()))?;

        let body = match tokio::fs::read(&self.config.file).await {
            Ok(body) => body,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(file = %self.config.file.display(), "log file not found, nothing to ship");
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };

        let name = app_log_object_name(file_name, self.clock.now());
        self.blobs
            .put_object(&self.config.bucket, &name, Bytes::from(body), LOG_CONTENT_TYPE)
            .await?;
        debug!(object = %name, "shipped log file");
        Ok(Some(name))
    }

    /// Ship every `interval` until `shutdown` turns true. Failures are
    /// logged and the loop keeps going.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(file = %self.config.file.display(), bucket = %self.config.bucket, "log shipper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.ship_once().await {
                        warn!(%error, "log shipping failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("log shipper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use feedgate_core::ManualClock;
    use feedgate_store::MemoryBlobStore;

    async fn shipper(file: PathBuf) -> (Arc<MemoryBlobStore>, LogShipper<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.ensure_bucket("app-logs").await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 7).unwrap(),
        ));
        let shipper = LogShipper::new(Arc::clone(&blobs), clock, LogShipConfig::enabled_for(file));
        (blobs, shipper)
    }

    #[tokio::test]
    async fn test_ships_file_under_dated_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed-api.log");
        tokio::fs::write(&path, b"request took 3ms\n").await.unwrap();

        let (blobs, shipper) = shipper(path).await;
        let name = shipper.ship_once().await.unwrap();

        assert_eq!(name.as_deref(), Some("logs/2024/05/feed-api_20240501_100007.log"));
        let stored = &blobs.objects_in("app-logs")[0];
        assert_eq!(stored.content_type, "text/plain");
        assert_eq!(stored.body, Bytes::from_static(b"request took 3ms\n"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (blobs, shipper) = shipper(dir.path().join("absent.log")).await;

        assert_eq!(shipper.ship_once().await.unwrap(), None);
        assert!(blobs.objects_in("app-logs").is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed-api.log");
        tokio::fs::write(&path, b"x").await.unwrap();

        let (blobs, shipper) = shipper(path).await;
        blobs.fail_puts(true);
        assert!(matches!(shipper.ship_once().await, Err(MeterError::Store(_))));
    }
}
