//! Request guard: authorization, metering and timing around a handler.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use feedgate_auth::{AuthorizationGate, BlockOutcome, Blocklist, GateConfig};
use feedgate_core::{detail_resource, Credential, StatusRecord};
use feedgate_meter::AccessMeter;
use feedgate_store::{CounterStore, KeyValueStore, SystemOfRecord};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

pub type Gate = AuthorizationGate<dyn KeyValueStore, dyn SystemOfRecord>;
pub type AddressBlocklist = Blocklist<dyn KeyValueStore, dyn SystemOfRecord>;
pub type Meter = AccessMeter<dyn CounterStore>;

/// The parts of an inbound request the guard looks at.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub path: String,
    headers: Vec<(String, String)>,
    remote_addr: Option<String>,
}

impl InboundRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Peer address, either `ip` or `ip:port`.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Client IP with any port stripped.
    pub fn client_ip(&self) -> Option<String> {
        let addr = self.remote_addr.as_deref()?;
        Some(match addr.parse::<SocketAddr>() {
            Ok(socket) => socket.ip().to_string(),
            Err(_) => addr.to_string(),
        })
    }
}

/// Wraps downstream handlers with the authorization gate and access meter.
#[derive(Clone)]
pub struct RequestGuard {
    gate: Arc<Gate>,
    blocklist: Arc<AddressBlocklist>,
    meter: Arc<Meter>,
    config: GateConfig,
}

impl RequestGuard {
    pub fn new(
        gate: Arc<Gate>,
        blocklist: Arc<AddressBlocklist>,
        meter: Arc<Meter>,
        config: GateConfig,
    ) -> Self {
        Self {
            gate,
            blocklist,
            meter,
            config,
        }
    }

    /// Authorize `request`, run `handler`, and count the access when the
    /// path names a detail resource.
    ///
    /// Rejections happen before the handler runs. The access is recorded
    /// without waiting for the counter store.
    pub async fn handle<F, Fut, T>(&self, request: &InboundRequest, handler: F) -> Result<T>
    where
        F: FnOnce(StatusRecord) -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();

        let credential = match Credential::parse(request.header(&self.config.header)) {
            Ok(credential) => credential,
            Err(_) => {
                warn!(path = %request.path, "request without credential");
                return Err(AppError::CredentialMissing);
            }
        };

        let status = self.gate.authorize_credential(&credential).await?;
        if !status.exists {
            warn!(path = %request.path, ?credential, "request from unregistered subject");
            return Err(AppError::SubjectUnknown);
        }
        if self.config.require_entitlement && !status.entitled {
            warn!(path = %request.path, ?credential, "request from subject without entitlement");
            return Err(AppError::NotEntitled);
        }

        let output = handler(status).await;

        if let Some(resource) = detail_resource(&request.path, &self.config.version_prefix) {
            match credential.subject() {
                Ok(subject) => {
                    debug!(%resource, %subject, "recording detail access");
                    self.meter.record(resource, subject);
                }
                Err(error) => {
                    warn!(?credential, %error, "credential cannot key a counter, access not counted")
                }
            }
        }

        info!(path = %request.path, elapsed = ?started.elapsed(), "request handled");
        Ok(output)
    }

    /// Whether the request's client address is blocked.
    pub async fn is_blocked(&self, request: &InboundRequest) -> bool {
        match request.client_ip() {
            Some(ip) => self.blocklist.is_blocked(&ip).await,
            None => false,
        }
    }

    /// Fallback for requests that matched no route: the client address is
    /// treated as an intruder and blocked.
    pub async fn reject_unknown_route(&self, request: &InboundRequest) -> Result<BlockOutcome> {
        let ip = request.client_ip().ok_or(AppError::ClientAddressMissing)?;
        warn!(ip = %ip, path = %request.path, "request to unknown route");
        Ok(self.blocklist.screen_unknown_route(&ip).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let request = InboundRequest::new("/api/v2/headlines").with_header("x-api-key", "U2");
        assert_eq!(request.header("X-API-Key"), Some("U2"));
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn test_client_ip_strips_port() {
        let v4 = InboundRequest::new("/").with_remote_addr("10.0.0.9:53211");
        assert_eq!(v4.client_ip().as_deref(), Some("10.0.0.9"));

        let v6 = InboundRequest::new("/").with_remote_addr("[::1]:8080");
        assert_eq!(v6.client_ip().as_deref(), Some("::1"));

        let bare = InboundRequest::new("/").with_remote_addr("10.0.0.9");
        assert_eq!(bare.client_ip().as_deref(), Some("10.0.0.9"));

        assert_eq!(InboundRequest::new("/").client_ip(), None);
    }
}
