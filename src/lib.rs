//! # vidsrc-resolver
//!
//! Resolves playable HLS stream URLs for a movie id by walking the vidsrc
//! embed chain (embed page, player wrapper, playback wrapper) through a pool
//! of verified public proxies.
//!
//! ## Features
//!
//! - Three-hop resolution with the browser referer chain each host expects
//! - Public proxy pool fetched from several lists and probed concurrently
//! - Retry with exponential backoff and eviction of failing proxies
//! - Supervised background refresh of the pool
//! - Structured fetch events feeding logs and per-host metrics
//!
//! ## Example
//!
//! ```no_run
//! use vidsrc_resolver::StreamResolver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = StreamResolver::new()?;
//!     let refresh = resolver.spawn_refresh_supervisor();
//!
//!     let outcome = resolver.resolve("tt5433140").await;
//!     for stream in &outcome.streams {
//!         println!("{} ({} headers)", stream.url, stream.headers.len());
//!     }
//!
//!     refresh.shutdown().await;
//!     Ok(())
//! }
//! ```

mod resolver;

pub mod config;
pub mod extract;
pub mod fetch;
pub mod headers;
pub mod modules;
pub mod pipeline;

pub use crate::resolver::{
    ResolveOutcome,
    ResolverError,
    ResolverResult,
    ResolverStats,
    StreamResolver,
    StreamResolverBuilder,
};

pub use crate::config::{ConfigError, ResolverConfig};

pub use crate::extract::{
    StreamCandidate,
    extract_domain_list,
    extract_file_templates,
    extract_iframe_src,
    extract_prorcp_path,
    extract_stream_templates,
    resolve_template,
};

pub use crate::fetch::{FetchError, ResilientFetcher, RetryPolicy};

pub use crate::fetch::transport::{
    HttpTransport,
    ReqwestTransport,
    TransportError,
    TransportErrorKind,
    TransportRequest,
    TransportResponse,
};

pub use crate::headers::{BrowserHeaders, HeaderBuilder, Hop};

pub use crate::pipeline::{
    PipelineEndpoints,
    PipelineFailure,
    PipelineStage,
    ResolutionPipeline,
};

pub use crate::modules::{
    EventDispatcher,
    EventHandler,
    GlobalStats,
    HostStats,
    LivenessProbe,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    PoolStats,
    Probe,
    ProbeOutcome,
    ProxyConfig,
    ProxyEntry,
    ProxyPool,
    ProxyPoolManager,
    ProxyProtocol,
    ProxySource,
    RefreshHandle,
    RefreshReport,
    RefreshSupervisor,
    ResolverEvent,
    Selection,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
