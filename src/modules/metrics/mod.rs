//! Metrics collection utilities.
//!
//! Aggregates fetch outcomes globally and per host, with latency percentiles,
//! for the stats operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Aggregated metrics across all hosts.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub proxy_evictions: u64,
    /// Pipelines that produced at least one stream.
    pub resolutions: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_requests: 0,
            successes: 0,
            failures: 0,
            proxy_evictions: 0,
            resolutions: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Host-scoped metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub host: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
}

impl HostStats {
    fn from_accumulator(host: &str, acc: &HostAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            host: host.to_string(),
            total_requests: acc.total_requests,
            successes: acc.successes,
            failures: acc.failures,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
            last_status: acc.last_status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub hosts: Vec<HostStats>,
    /// Failed pipelines keyed by the last stage they reached.
    pub stage_failures: BTreeMap<String, u64>,
}

/// Only a 200 counts as success; the fetcher retries or aborts on anything else.
fn is_success(status: u16) -> bool {
    status == 200
}

fn p95(sorted: &[Duration]) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    Some(sorted[index])
}

#[derive(Debug)]
struct HostAccumulator {
    total_requests: u64,
    successes: u64,
    failures: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_status: Option<u16>,
}

impl HostAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_requests: 0,
            successes: 0,
            failures: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_status: None,
        }
    }

    fn record(&mut self, status: u16, latency: Duration) {
        self.total_requests += 1;
        self.last_status = Some(status);

        if is_success(status) {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        (Some(Duration::from_secs_f64(avg)), p95(&samples))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    hosts: HashMap<String, HostAccumulator>,
    stage_failures: BTreeMap<String, u64>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            hosts: HashMap::new(),
            stage_failures: BTreeMap::new(),
        }
    }

    fn accumulator_mut(&mut self, host: &str) -> &mut HostAccumulator {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| HostAccumulator::new(self.max_window))
    }
}

/// Thread-safe metrics collector shared by the event handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_response(&self, host: &str, status: u16, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_requests += 1;
        if is_success(status) {
            guard.global.successes += 1;
        } else {
            guard.global.failures += 1;
        }

        if let Some(avg) = guard.global.average_latency {
            let blended = (avg.as_secs_f64() * 0.9) + (latency.as_secs_f64() * 0.1);
            guard.global.average_latency = Some(Duration::from_secs_f64(blended));
        } else {
            guard.global.average_latency = Some(latency);
        }

        guard.accumulator_mut(host).record(status, latency);

        let mut samples: Vec<_> = guard
            .hosts
            .values()
            .flat_map(|host| host.latencies.iter())
            .cloned()
            .collect();
        samples.sort_unstable();
        guard.global.p95_latency = p95(&samples);
    }

    /// Transport-level failure with no status code.
    pub fn record_error(&self, host: &str) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_requests += 1;
        guard.global.failures += 1;
        let acc = guard.accumulator_mut(host);
        acc.total_requests += 1;
        acc.failures += 1;
        acc.consecutive_failures = acc.consecutive_failures.saturating_add(1);
        acc.last_status = None;
    }

    pub fn record_eviction(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.proxy_evictions += 1;
    }

    pub fn record_resolution(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.resolutions += 1;
    }

    pub fn record_stage_failure(&self, stage: &str) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        *guard.stage_failures.entry(stage.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let mut hosts: Vec<HostStats> = guard
            .hosts
            .iter()
            .map(|(host, acc)| HostStats::from_accumulator(host, acc))
            .collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        MetricsSnapshot {
            global: guard.global.clone(),
            hosts,
            stage_failures: guard.stage_failures.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
