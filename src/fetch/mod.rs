//! Retrying page fetcher with proxy rotation.
//!
//! A single routine serves every hop: the caller supplies the URL and headers,
//! the fetcher picks a proxy, retries transient failures with exponential
//! backoff, evicts proxies that fail, and gives up immediately on 4xx.

pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::HeaderMap;
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use crate::modules::events::{
    AttemptEvent, ErrorEvent, EventDispatcher, PostResponseEvent, ProxyEvictedEvent, ResolverEvent,
    RetryEvent,
};
use crate::modules::proxy::{ProxyEntry, ProxyPool, Selection};

use transport::{HttpTransport, TransportRequest};

/// Retry budget and timing for page fetches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Delay before the second attempt; doubles for each later attempt.
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub use_proxy: bool,
}

impl RetryPolicy {
    /// Delay after the zero-based `attempt` failed: `base * 2^attempt`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            use_proxy: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("client error {status} from {url}")]
    ClientError { url: String, status: u16 },
    #[error("all {attempts} attempts failed for {url}: {last_error}")]
    Exhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },
}

/// Fetches page bodies through the proxy pool.
#[derive(Clone)]
pub struct ResilientFetcher {
    transport: Arc<dyn HttpTransport>,
    pool: Arc<dyn ProxyPool>,
    policy: RetryPolicy,
    events: Arc<EventDispatcher>,
}

impl ResilientFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        pool: Arc<dyn ProxyPool>,
        policy: RetryPolicy,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            transport,
            pool,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Fetch with the configured retry budget and proxy setting.
    pub async fn get(&self, url: &Url, headers: &HeaderMap) -> Option<String> {
        self.fetch(url, headers, self.policy.max_retries, self.policy.use_proxy)
            .await
    }

    /// Body of a 200 response, or `None` after a 4xx or exhausted retries.
    pub async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        max_retries: usize,
        use_proxy: bool,
    ) -> Option<String> {
        match self.try_fetch(url, headers, max_retries, use_proxy).await {
            Ok(body) => Some(body),
            Err(err) => {
                log::warn!("{err}");
                None
            }
        }
    }

    pub async fn try_fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        max_retries: usize,
        use_proxy: bool,
    ) -> Result<String, FetchError> {
        let host = url.host_str().unwrap_or_default().to_string();
        let mut last_error = String::from("no attempts made");

        for attempt in 0..max_retries {
            let selection = if attempt == 0 {
                Selection::Random
            } else {
                Selection::Latest
            };
            let proxy = if use_proxy {
                self.pool.acquire(selection)
            } else {
                None
            };

            self.events.dispatch(ResolverEvent::Attempt(AttemptEvent {
                url: url.clone(),
                attempt: attempt + 1,
                max_attempts: max_retries,
                proxy: proxy.as_ref().map(ToString::to_string),
                timestamp: chrono::Utc::now(),
            }));

            let started = Instant::now();
            let result = self
                .transport
                .get(TransportRequest {
                    url,
                    headers,
                    proxy: proxy.as_ref(),
                    timeout: self.policy.timeout,
                })
                .await;
            let latency = started.elapsed();

            match result {
                Ok(response) => {
                    self.events.dispatch(ResolverEvent::PostResponse(PostResponseEvent {
                        url: url.clone(),
                        status: response.status,
                        latency,
                        proxy: proxy.as_ref().map(ToString::to_string),
                        timestamp: chrono::Utc::now(),
                    }));

                    if response.is_ok() {
                        if let Some(proxy) = &proxy {
                            self.pool.report_success(proxy);
                        }
                        return Ok(response.text());
                    }
                    if response.is_client_error() {
                        return Err(FetchError::ClientError {
                            url: url.to_string(),
                            status: response.status,
                        });
                    }
                    last_error = format!("status {}", response.status);
                }
                Err(err) => {
                    self.events.dispatch(ResolverEvent::Error(ErrorEvent {
                        host: host.clone(),
                        attempt: attempt + 1,
                        error: err.to_string(),
                        timestamp: chrono::Utc::now(),
                    }));
                    last_error = err.to_string();
                }
            }

            if let Some(proxy) = &proxy {
                self.evict(proxy, &last_error);
            }

            if attempt + 1 < max_retries {
                let wait = self.policy.backoff(attempt);
                self.events.dispatch(ResolverEvent::Retry(RetryEvent {
                    host: host.clone(),
                    attempt: attempt + 2,
                    reason: last_error.clone(),
                    scheduled_after: wait,
                    timestamp: chrono::Utc::now(),
                }));
                sleep(wait).await;
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_retries,
            last_error,
        })
    }

    fn evict(&self, proxy: &ProxyEntry, reason: &str) {
        if self.pool.report_failure(proxy) {
            self.events.dispatch(ResolverEvent::ProxyEvicted(ProxyEvictedEvent {
                proxy: proxy.to_string(),
                reason: reason.to_string(),
                remaining: self.pool.working_len(),
                timestamp: chrono::Utc::now(),
            }));
        }
    }
}
