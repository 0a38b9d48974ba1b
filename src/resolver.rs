//! High level resolver orchestration.
//!
//! Wires the proxy pool, resilient fetcher, header profile and resolution
//! pipeline together behind [`StreamResolver`], which exposes the operations
//! a network layer wraps: resolve a movie, refresh the proxy pool, report
//! stats.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::{ConfigError, ResolverConfig};
use crate::extract::StreamCandidate;
use crate::fetch::ResilientFetcher;
use crate::fetch::transport::{HttpTransport, ReqwestTransport};
use crate::headers::{BrowserHeaders, HeaderBuilder};
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler, MetricsHandler};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::proxy::{
	GeonodeSource, LivenessProbe, PlainTextListSource, PoolStats, Probe, ProxyPoolManager,
	ProxySource, RefreshReport,
};
use crate::modules::supervisor::{RefreshHandle, RefreshSupervisor};
use crate::pipeline::{PipelineFailure, ResolutionPipeline};

/// Result alias used across the orchestration layer.
pub type ResolverResult<T> = Result<T, ResolverError>;

#[derive(Debug, Error)]
pub enum ResolverError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
	#[error("invalid movie id {0:?}")]
	InvalidId(String),
	#[error(transparent)]
	Pipeline(#[from] PipelineFailure),
	#[error("resolution aborted: {0}")]
	Aborted(String),
}

/// Outcome handed to the network boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
	pub success: bool,
	pub reason: Option<String>,
	pub streams: Vec<StreamCandidate>,
}

impl ResolveOutcome {
	fn resolved(streams: Vec<StreamCandidate>) -> Self {
		Self {
			success: true,
			reason: None,
			streams,
		}
	}

	fn failed(reason: impl Into<String>) -> Self {
		Self {
			success: false,
			reason: Some(reason.into()),
			streams: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolverStats {
	pub pool: PoolStats,
	pub metrics: Option<MetricsSnapshot>,
}

/// Aborts the wrapped task when dropped, so a discarded resolution stops
/// fetching and touching the pool.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// Builder for [`StreamResolver`]. Anything left unset falls back to the
/// network-backed default derived from the config.
pub struct StreamResolverBuilder {
	config: ResolverConfig,
	transport: Option<Arc<dyn HttpTransport>>,
	probe_transport: Option<Arc<dyn HttpTransport>>,
	header_builder: Option<Arc<dyn HeaderBuilder>>,
	sources: Option<Vec<Arc<dyn ProxySource>>>,
	probe: Option<Arc<dyn Probe>>,
	handlers: Vec<Arc<dyn EventHandler>>,
	enable_metrics: bool,
	enable_logging: bool,
}

impl StreamResolverBuilder {
	pub fn new() -> Self {
		Self {
			config: ResolverConfig::default(),
			transport: None,
			probe_transport: None,
			header_builder: None,
			sources: None,
			probe: None,
			handlers: Vec::new(),
			enable_metrics: true,
			enable_logging: true,
		}
	}

	pub fn with_config(mut self, config: ResolverConfig) -> Self {
		self.config = config;
		self
	}

	/// Transport used for page hops and proxy list downloads.
	pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_probe_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.probe_transport = Some(transport);
		self
	}

	pub fn with_header_builder(mut self, builder: Arc<dyn HeaderBuilder>) -> Self {
		self.header_builder = Some(builder);
		self
	}

	pub fn with_proxy_sources(mut self, sources: Vec<Arc<dyn ProxySource>>) -> Self {
		self.sources = Some(sources);
		self
	}

	pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
		self.probe = Some(probe);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn with_max_retries(mut self, retries: usize) -> Self {
		self.config.max_retries = retries.max(1);
		self
	}

	/// Always connect directly, even when the pool has working proxies.
	pub fn disable_proxies(mut self) -> Self {
		self.config.use_proxy = false;
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.enable_metrics = false;
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.enable_logging = false;
		self
	}

	pub fn build(self) -> ResolverResult<StreamResolver> {
		StreamResolver::from_builder(self)
	}
}

impl Default for StreamResolverBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Main resolver. Cheap to share behind an `Arc`; every operation takes
/// `&self`.
pub struct StreamResolver {
	config: ResolverConfig,
	pool: Arc<ProxyPoolManager>,
	pipeline: ResolutionPipeline,
	metrics: Option<MetricsCollector>,
}

impl StreamResolver {
	/// Construct a resolver with default configuration.
	pub fn new() -> ResolverResult<Self> {
		StreamResolverBuilder::new().build()
	}

	pub fn builder() -> StreamResolverBuilder {
		StreamResolverBuilder::new()
	}

	fn from_builder(builder: StreamResolverBuilder) -> ResolverResult<Self> {
		let config = builder.config;
		config.validate()?;

		let transport = builder
			.transport
			.unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

		let probe: Arc<dyn Probe> = match builder.probe {
			Some(probe) => probe,
			None => {
				let probe_transport = builder
					.probe_transport
					.unwrap_or_else(|| Arc::new(ReqwestTransport::uncached()));
				let target = Url::parse(&config.probe_url)?;
				Arc::new(LivenessProbe::new(probe_transport, target).with_timeout(config.probe_timeout()))
			}
		};

		let sources = builder.sources.unwrap_or_else(|| {
			let mut sources: Vec<Arc<dyn ProxySource>> =
				PlainTextListSource::per_protocol(&config.plain_text_list_template)
					.into_iter()
					.map(|source| Arc::new(source) as Arc<dyn ProxySource>)
					.collect();
			sources.push(Arc::new(GeonodeSource::new(config.geonode_url.clone())));
			sources
		});

		let headers = builder.header_builder.unwrap_or_else(|| {
			Arc::new(
				BrowserHeaders::new()
					.with_user_agent(config.user_agent.clone())
					.with_accept_language(config.accept_language.clone()),
			)
		});

		let pool = Arc::new(ProxyPoolManager::new(
			config.proxy_config(),
			sources,
			probe,
			transport.clone(),
		));

		let mut events = EventDispatcher::new();
		if builder.enable_logging {
			events.register_handler(Arc::new(LoggingHandler));
		}
		let metrics = builder.enable_metrics.then(MetricsCollector::new);
		if let Some(metrics) = &metrics {
			events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
		}
		for handler in builder.handlers {
			events.register_handler(handler);
		}

		let fetcher = ResilientFetcher::new(
			transport,
			pool.clone(),
			config.retry_policy(),
			Arc::new(events),
		);
		let pipeline = ResolutionPipeline::new(fetcher, headers, config.endpoints());

		Ok(Self {
			config,
			pool,
			pipeline,
			metrics,
		})
	}

	pub fn config(&self) -> &ResolverConfig {
		&self.config
	}

	pub fn pool(&self) -> &Arc<ProxyPoolManager> {
		&self.pool
	}

	/// Resolve a movie id into playable streams. Never panics or errors; the
	/// failure reason is carried in the outcome.
	pub async fn resolve(&self, imdb_id: &str) -> ResolveOutcome {
		match self.resolve_imdb(imdb_id).await {
			Ok(streams) => ResolveOutcome::resolved(streams),
			Err(err) => {
				log::warn!("resolution of {imdb_id:?} failed: {err}");
				ResolveOutcome::failed(err.to_string())
			}
		}
	}

	pub async fn resolve_imdb(&self, imdb_id: &str) -> ResolverResult<Vec<StreamCandidate>> {
		let id = imdb_id.trim();
		if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
			return Err(ResolverError::InvalidId(imdb_id.to_string()));
		}
		let url = self.pipeline.endpoints().movie_url(id);
		self.resolve_url(&url).await
	}

	/// Resolve an embed page URL directly. The pipeline runs in its own task
	/// so a panic inside it surfaces as [`ResolverError::Aborted`]; dropping
	/// the returned future aborts that task.
	pub async fn resolve_url(&self, embed_url: &str) -> ResolverResult<Vec<StreamCandidate>> {
		let pipeline = self.pipeline.clone();
		let embed_url = embed_url.to_string();
		let mut task = AbortOnDrop(tokio::spawn(async move { pipeline.run(&embed_url).await }));
		let joined = (&mut task.0).await;
		match joined {
			Ok(result) => Ok(result?),
			Err(err) => Err(ResolverError::Aborted(err.to_string())),
		}
	}

	/// Rebuild the proxy pool now. Serialized with any scheduled refresh.
	pub async fn refresh_proxies(&self) -> RefreshReport {
		self.pool.refresh_default().await
	}

	pub fn proxy_stats(&self) -> ResolverStats {
		ResolverStats {
			pool: self.pool.stats(),
			metrics: self.metrics.as_ref().map(MetricsCollector::snapshot),
		}
	}

	/// Start the background refresh: one run now, then one per configured
	/// interval.
	pub fn spawn_refresh_supervisor(&self) -> RefreshHandle {
		RefreshSupervisor::new(self.pool.clone())
			.with_interval(self.config.refresh_interval())
			.spawn()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fetch::transport::{TransportError, TransportRequest, TransportResponse};
	use crate::modules::proxy::{ProbeOutcome, ProxyEntry, SourceError};
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingTransport {
		calls: AtomicUsize,
	}

	#[async_trait]
	impl HttpTransport for CountingTransport {
		async fn get(&self, request: TransportRequest<'_>) -> Result<TransportResponse, TransportError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(TransportResponse::new(503, Vec::new(), request.url.clone()))
		}
	}

	struct ListSource;

	#[async_trait]
	impl ProxySource for ListSource {
		fn name(&self) -> &str {
			"list"
		}

		async fn fetch(&self, _transport: &dyn HttpTransport) -> Result<Vec<ProxyEntry>, SourceError> {
			Ok(vec![
				"http://10.0.0.1:8080".parse().unwrap(),
				"socks5://10.0.0.2:1080".parse().unwrap(),
			])
		}
	}

	struct AlwaysAlive;

	#[async_trait]
	impl Probe for AlwaysAlive {
		async fn probe(&self, _candidate: &ProxyEntry) -> ProbeOutcome {
			ProbeOutcome::Alive
		}
	}

	fn resolver(transport: Arc<CountingTransport>) -> StreamResolver {
		let config = ResolverConfig {
			backoff_base_ms: 1,
			..ResolverConfig::default()
		};
		StreamResolver::builder()
			.with_config(config)
			.with_transport(transport)
			.with_proxy_sources(vec![Arc::new(ListSource)])
			.with_probe(Arc::new(AlwaysAlive))
			.build()
			.unwrap()
	}

	#[tokio::test]
	async fn invalid_ids_fail_without_network() {
		let transport = Arc::new(CountingTransport {
			calls: AtomicUsize::new(0),
		});
		let resolver = resolver(transport.clone());
		for id in ["", "   ", "tt12/../x", "tt 1"] {
			let outcome = resolver.resolve(id).await;
			assert!(!outcome.success);
			assert!(outcome.streams.is_empty());
			assert!(outcome.reason.unwrap().contains("invalid movie id"));
		}
		assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn failed_resolution_reports_reason_and_metrics() {
		let transport = Arc::new(CountingTransport {
			calls: AtomicUsize::new(0),
		});
		let resolver = resolver(transport.clone());
		let outcome = resolver.resolve("tt5433140").await;
		assert!(!outcome.success);
		assert_eq!(outcome.reason.as_deref(), Some("failed to fetch embed page"));
		assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

		let stats = resolver.proxy_stats();
		let metrics = stats.metrics.unwrap();
		assert_eq!(metrics.global.total_requests, 3);
		assert_eq!(metrics.global.failures, 3);
		assert_eq!(metrics.stage_failures.get("start"), Some(&1));
		assert_eq!(metrics.global.resolutions, 0);
	}

	#[tokio::test]
	async fn refresh_populates_pool_stats() {
		let transport = Arc::new(CountingTransport {
			calls: AtomicUsize::new(0),
		});
		let resolver = resolver(transport);
		let report = resolver.refresh_proxies().await;
		assert_eq!(report.working, 2);

		let stats = resolver.proxy_stats();
		assert_eq!(stats.pool.working, 2);
		assert_eq!(stats.pool.http_candidates, 1);
		assert_eq!(stats.pool.socks5_candidates, 1);
		assert!(stats.pool.last_refresh.is_some());
	}

	#[tokio::test]
	async fn dropping_a_resolution_stops_its_fetches() {
		let transport = Arc::new(CountingTransport {
			calls: AtomicUsize::new(0),
		});
		let config = ResolverConfig {
			backoff_base_ms: 100,
			..ResolverConfig::default()
		};
		let resolver = Arc::new(
			StreamResolver::builder()
				.with_config(config)
				.with_transport(transport.clone())
				.with_proxy_sources(Vec::new())
				.disable_proxies()
				.build()
				.unwrap(),
		);

		let running = {
			let resolver = resolver.clone();
			tokio::spawn(async move { resolver.resolve("tt1").await })
		};
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		running.abort();
		let _ = running.await;

		let at_cancel = transport.calls.load(Ordering::SeqCst);
		tokio::time::sleep(std::time::Duration::from_millis(500)).await;
		assert_eq!(at_cancel, 1);
		assert_eq!(transport.calls.load(Ordering::SeqCst), at_cancel);
	}

	#[test]
	fn invalid_config_is_rejected_at_build() {
		let config = ResolverConfig {
			probe_url: "not a url".into(),
			..ResolverConfig::default()
		};
		assert!(matches!(
			StreamResolver::builder().with_config(config).build(),
			Err(ResolverError::Config(_))
		));
	}
}
