//! Event system for fetch and pipeline activity.
//!
//! The fetcher and the pipeline publish structured events; handlers turn them
//! into log lines and metrics.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;

/// A fetch attempt is about to be sent.
#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub url: Url,
    pub attempt: usize,
    pub max_attempts: usize,
    pub proxy: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A response arrived, whatever its status.
#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub url: Url,
    pub status: u16,
    pub latency: Duration,
    pub proxy: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub host: String,
    pub attempt: usize,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub host: String,
    pub attempt: usize,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProxyEvictedEvent {
    pub proxy: String,
    pub reason: String,
    pub remaining: usize,
    pub timestamp: DateTime<Utc>,
}

/// The resolution pipeline moved to a new stage.
#[derive(Debug, Clone)]
pub struct StageEvent {
    pub stage: &'static str,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// The resolution pipeline gave up. `stage` is the last stage reached.
#[derive(Debug, Clone)]
pub struct PipelineFailedEvent {
    pub stage: &'static str,
    pub reason: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ResolverEvent {
    Attempt(AttemptEvent),
    PostResponse(PostResponseEvent),
    Error(ErrorEvent),
    Retry(RetryEvent),
    ProxyEvicted(ProxyEvictedEvent),
    Stage(StageEvent),
    PipelineFailed(PipelineFailedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ResolverEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ResolverEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ResolverEvent) {
        match event {
            ResolverEvent::Attempt(attempt) => match &attempt.proxy {
                Some(proxy) => log::info!(
                    "attempt {}/{}: fetching {} via proxy {}",
                    attempt.attempt,
                    attempt.max_attempts,
                    attempt.url,
                    proxy
                ),
                None => log::info!(
                    "attempt {}/{}: fetching {} (no proxy)",
                    attempt.attempt,
                    attempt.max_attempts,
                    attempt.url
                ),
            },
            ResolverEvent::PostResponse(post) => {
                log::debug!(
                    "<- {} -> {} ({:.2}s)",
                    post.url,
                    post.status,
                    post.latency.as_secs_f64()
                );
            }
            ResolverEvent::Error(error) => {
                log::warn!("{} attempt {} failed: {}", error.host, error.attempt, error.error);
            }
            ResolverEvent::Retry(retry) => {
                log::info!(
                    "retrying {} (attempt {}) in {:.2}s after {}",
                    retry.host,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            ResolverEvent::ProxyEvicted(evicted) => {
                log::info!(
                    "evicted proxy {} ({}), {} left",
                    evicted.proxy,
                    evicted.reason,
                    evicted.remaining
                );
            }
            ResolverEvent::Stage(stage) => {
                log::debug!("pipeline reached {} at {}", stage.stage, stage.url);
            }
            ResolverEvent::PipelineFailed(failed) => {
                log::warn!(
                    "pipeline for {} stopped after {}: {}",
                    failed.url,
                    failed.stage,
                    failed.reason
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &ResolverEvent) {
        match event {
            ResolverEvent::PostResponse(post) => {
                self.metrics
                    .record_response(post.url.host_str().unwrap_or(""), post.status, post.latency);
            }
            ResolverEvent::Error(error) => {
                self.metrics.record_error(&error.host);
            }
            ResolverEvent::ProxyEvicted(_) => {
                self.metrics.record_eviction();
            }
            ResolverEvent::Stage(stage) if stage.stage == "resolved" => {
                self.metrics.record_resolution();
            }
            ResolverEvent::PipelineFailed(failed) => {
                self.metrics.record_stage_failure(failed.stage);
            }
            _ => {}
        }
    }
}
