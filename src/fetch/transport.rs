//! HTTP transport seam shared by the fetcher, the liveness probe and the proxy
//! list sources.
//!
//! The [`HttpTransport`] trait only exposes what the resolver needs from the
//! network (status code and body of a GET), which keeps the retry and pool
//! logic testable against in-memory stubs. [`ReqwestTransport`] is the
//! production implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::headers::CHROME_120_USER_AGENT;
use crate::modules::proxy::ProxyEntry;

/// Upper bound on cached per-proxy clients before the cache is flushed.
const MAX_CACHED_CLIENTS: usize = 256;

/// A single outbound GET.
#[derive(Debug, Clone)]
pub struct TransportRequest<'a> {
    pub url: &'a Url,
    pub headers: &'a HeaderMap,
    pub proxy: Option<&'a ProxyEntry>,
    pub timeout: Duration,
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
    pub url: Url,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>, url: Url) -> Self {
        Self {
            status,
            body: body.into(),
            url,
        }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Proxy,
    Body,
    Other,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid proxy: {0}")]
    Proxy(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Timeout(_) => TransportErrorKind::Timeout,
            TransportError::Connect(_) => TransportErrorKind::Connect,
            TransportError::Proxy(_) => TransportErrorKind::Proxy,
            TransportError::Body(_) => TransportErrorKind::Body,
            TransportError::Other(_) => TransportErrorKind::Other,
        }
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Minimal GET transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        request: TransportRequest<'_>,
    ) -> Result<TransportResponse, TransportError>;
}

/// Reqwest-backed transport impersonating a desktop Chrome client.
///
/// One client is kept per proxy endpoint so keep-alive connections survive
/// between hops of the same resolution.
pub struct ReqwestTransport {
    cache_clients: bool,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            cache_clients: true,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Transport that builds a fresh client per request. Used for liveness
    /// probes where most endpoints are dead and never contacted again.
    pub fn uncached() -> Self {
        Self {
            cache_clients: false,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, proxy: Option<&ProxyEntry>) -> Result<Client, TransportError> {
        let key = proxy.map(|p| p.to_string());
        if self.cache_clients {
            let guard = self.clients.lock().expect("client cache lock poisoned");
            if let Some(client) = guard.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut builder = Client::builder()
            .user_agent(CHROME_120_USER_AGENT)
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(5));

        if let Some(endpoint) = &key {
            let proxy = reqwest::Proxy::all(endpoint.as_str())
                .map_err(|err| TransportError::Proxy(err.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;

        if self.cache_clients {
            let mut guard = self.clients.lock().expect("client cache lock poisoned");
            if guard.len() >= MAX_CACHED_CLIENTS {
                log::debug!("flushing {} cached transport clients", guard.len());
                guard.clear();
            }
            guard.insert(key, client.clone());
        }

        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        request: TransportRequest<'_>,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.client(request.proxy)?;

        let response = client
            .get(request.url.as_str())
            .headers(request.headers.clone())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|err| TransportError::from_reqwest(err, request.timeout))?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::from_reqwest(err, request.timeout))?;

        Ok(TransportResponse { status, body, url })
    }
}
