//! Liveness probing for proxy candidates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use url::Url;

use crate::fetch::transport::{HttpTransport, TransportErrorKind, TransportRequest};

use super::ProxyEntry;

pub const IPIFY_URL: &str = "https://api.ipify.org";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of probing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    /// The proxy answered with a non-200 status.
    Rejected(u16),
    Failed(TransportErrorKind),
}

impl ProbeOutcome {
    pub fn is_alive(&self) -> bool {
        matches!(self, ProbeOutcome::Alive)
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, candidate: &ProxyEntry) -> ProbeOutcome;
}

/// Requests an IP echo endpoint through the candidate; only a 200 counts.
pub struct LivenessProbe {
    transport: Arc<dyn HttpTransport>,
    target: Url,
    timeout: Duration,
    headers: HeaderMap,
}

impl LivenessProbe {
    pub fn new(transport: Arc<dyn HttpTransport>, target: Url) -> Self {
        Self {
            transport,
            target,
            timeout: DEFAULT_PROBE_TIMEOUT,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target(&self) -> &Url {
        &self.target
    }
}

#[async_trait]
impl Probe for LivenessProbe {
    async fn probe(&self, candidate: &ProxyEntry) -> ProbeOutcome {
        let result = self
            .transport
            .get(TransportRequest {
                url: &self.target,
                headers: &self.headers,
                proxy: Some(candidate),
                timeout: self.timeout,
            })
            .await;

        // Most public proxies are dead; failures stay at debug level.
        match result {
            Ok(response) if response.status == 200 => {
                log::debug!("proxy {candidate} is alive");
                ProbeOutcome::Alive
            }
            Ok(response) => {
                log::trace!("proxy {candidate} rejected probe with {}", response.status);
                ProbeOutcome::Rejected(response.status)
            }
            Err(err) => {
                log::trace!("proxy {candidate} probe failed: {err}");
                ProbeOutcome::Failed(err.kind())
            }
        }
    }
}
