//! Cross-cutting services module
//!
//! Proxy pool, scheduled refresh, fetch events and metrics.

pub mod events;
pub mod metrics;
pub mod proxy;
pub mod supervisor;

// Re-export commonly used types
pub use events::{
    AttemptEvent, ErrorEvent, EventDispatcher, EventHandler, LoggingHandler, MetricsHandler,
    PipelineFailedEvent, PostResponseEvent, ProxyEvictedEvent, ResolverEvent, RetryEvent, StageEvent,
};
pub use metrics::{GlobalStats, HostStats, MetricsCollector, MetricsSnapshot};
pub use proxy::{
    GeonodeSource, LivenessProbe, PlainTextListSource, PoolStats, Probe, ProbeOutcome,
    ProxyConfig, ProxyEntry, ProxyPool, ProxyPoolManager, ProxyProtocol, ProxySource,
    RefreshReport, Selection, SourceError,
};
pub use supervisor::{RefreshHandle, RefreshSupervisor, RefreshTarget};
