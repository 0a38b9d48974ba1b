//! Public proxy pool with refresh, probing and eviction.
//!
//! Candidates are pulled from the configured [`ProxySource`]s, probed for
//! liveness with bounded concurrency, and the survivors form the working
//! sequence handed out to the fetcher. The working sequence only shrinks
//! between refreshes: failed proxies are evicted, nothing is appended.

pub mod probe;
pub mod sources;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::fetch::transport::{HttpTransport, TransportErrorKind};

pub use probe::{LivenessProbe, Probe, ProbeOutcome};
pub use sources::{GeonodeSource, PlainTextListSource, ProxySource, SourceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Socks4,
    Socks5,
    Http,
}

impl ProxyProtocol {
    /// Order in which candidate lists are concatenated before probing.
    pub const ALL: [ProxyProtocol; 3] = [
        ProxyProtocol::Socks4,
        ProxyProtocol::Socks5,
        ProxyProtocol::Http,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Http => "http",
        }
    }

    fn index(&self) -> usize {
        match self {
            ProxyProtocol::Socks4 => 0,
            ProxyProtocol::Socks5 => 1,
            ProxyProtocol::Http => 2,
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyProtocol {
    type Err = ProxyParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "socks4" => Ok(ProxyProtocol::Socks4),
            "socks5" => Ok(ProxyProtocol::Socks5),
            "http" => Ok(ProxyProtocol::Http),
            other => Err(ProxyParseError::UnsupportedProtocol(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyParseError {
    #[error("missing protocol prefix in '{0}'")]
    MissingProtocol(String),
    #[error("unsupported proxy protocol '{0}'")]
    UnsupportedProtocol(String),
    #[error("missing host in '{0}'")]
    MissingHost(String),
    #[error("invalid port in '{0}'")]
    InvalidPort(String),
}

/// A proxy endpoint in `protocol://host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEntry {
    protocol: ProxyProtocol,
    host: String,
    port: u16,
}

impl ProxyEntry {
    pub fn new(protocol: ProxyProtocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    /// Parse a bare `host:port` address as published by list sources.
    pub fn from_address(protocol: ProxyProtocol, address: &str) -> Result<Self, ProxyParseError> {
        let address = address.trim();
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| ProxyParseError::InvalidPort(address.to_string()))?;
        if host.is_empty() {
            return Err(ProxyParseError::MissingHost(address.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ProxyParseError::InvalidPort(address.to_string()))?;
        Ok(Self::new(protocol, host, port))
    }

    pub fn protocol(&self) -> ProxyProtocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl FromStr for ProxyEntry {
    type Err = ProxyParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (scheme, address) = value
            .trim()
            .split_once("://")
            .ok_or_else(|| ProxyParseError::MissingProtocol(value.to_string()))?;
        let protocol = scheme.parse::<ProxyProtocol>()?;
        ProxyEntry::from_address(protocol, address)
    }
}

impl Serialize for ProxyEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How the pool picks a proxy when no last-working proxy is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Uniformly random entry of the working sequence.
    Random,
    /// Most recently added entry of the working sequence.
    Latest,
}

/// Proxy pool interface consumed by the fetcher.
pub trait ProxyPool: Send + Sync {
    /// Pick a proxy, preferring the cached last-working one. `None` means
    /// connect directly.
    fn acquire(&self, selection: Selection) -> Option<ProxyEntry>;

    /// Mark a proxy as having served a request successfully.
    fn report_success(&self, proxy: &ProxyEntry);

    /// Evict a failed proxy. Returns true when it was still in the working
    /// sequence.
    fn report_failure(&self, proxy: &ProxyEntry) -> bool;

    fn working_len(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Cap on candidates probed per refresh.
    pub max_to_test: usize,
    /// Maximum number of probes in flight.
    pub probe_concurrency: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_to_test: 200,
            probe_concurrency: 50,
        }
    }
}

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub fetched: usize,
    pub tested: usize,
    pub working: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

impl RefreshReport {
    pub(crate) fn new(fetched: usize, tested: usize, working: usize, duration: Duration) -> Self {
        let success_rate = if tested == 0 {
            0.0
        } else {
            working as f64 / tested as f64 * 100.0
        };
        Self {
            fetched,
            tested,
            working,
            failed: tested - working,
            success_rate,
            duration,
            completed_at: Utc::now(),
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub working: usize,
    pub socks4_candidates: usize,
    pub socks5_candidates: usize,
    pub http_candidates: usize,
    pub last_working: Option<ProxyEntry>,
    pub last_refresh: Option<RefreshReport>,
}

/// Per-protocol candidate lists, de-duplicated in insertion order.
#[derive(Debug, Default)]
struct CandidateLists {
    lists: [Vec<ProxyEntry>; 3],
    seen: HashSet<ProxyEntry>,
}

impl CandidateLists {
    fn push(&mut self, entry: ProxyEntry) -> bool {
        if !self.seen.insert(entry.clone()) {
            return false;
        }
        self.lists[entry.protocol().index()].push(entry);
        true
    }

    fn len(&self, protocol: ProxyProtocol) -> usize {
        self.lists[protocol.index()].len()
    }

    fn total(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    fn concat(&self) -> Vec<ProxyEntry> {
        ProxyProtocol::ALL
            .iter()
            .flat_map(|protocol| self.lists[protocol.index()].iter().cloned())
            .collect()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    candidates: CandidateLists,
    working: Vec<ProxyEntry>,
    last_working: Option<ProxyEntry>,
    last_refresh: Option<RefreshReport>,
}

/// Process-wide proxy pool.
pub struct ProxyPoolManager {
    config: ProxyConfig,
    sources: Vec<Arc<dyn ProxySource>>,
    probe: Arc<dyn Probe>,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<PoolState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ProxyPoolManager {
    pub fn new(
        config: ProxyConfig,
        sources: Vec<Arc<dyn ProxySource>>,
        probe: Arc<dyn Probe>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            sources,
            probe,
            transport,
            state: Mutex::new(PoolState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Install a working sequence directly, bypassing sources and probes.
    pub fn load<I>(&self, proxies: I)
    where
        I: IntoIterator<Item = ProxyEntry>,
    {
        let mut guard = self.state.lock().expect("proxy pool lock poisoned");
        guard.working.clear();
        guard.last_working = None;
        let mut seen = HashSet::new();
        for proxy in proxies {
            if seen.insert(proxy.clone()) {
                guard.working.push(proxy);
            }
        }
    }

    /// Pull candidates from every source into the per-protocol lists. A failing
    /// source is logged and skipped. Returns the number of new candidates.
    pub async fn fetch_candidates(&self) -> usize {
        let mut fetched = Vec::new();
        for source in &self.sources {
            match source.fetch(self.transport.as_ref()).await {
                Ok(entries) => {
                    log::info!("proxy source {} returned {} entries", source.name(), entries.len());
                    fetched.extend(entries);
                }
                Err(err) => {
                    log::warn!("proxy source {} failed: {err}", source.name());
                }
            }
        }

        let mut guard = self.state.lock().expect("proxy pool lock poisoned");
        let mut added = 0;
        for entry in fetched {
            if guard.candidates.push(entry) {
                added += 1;
            }
        }
        added
    }

    /// Probe a single candidate.
    pub async fn probe(&self, candidate: &ProxyEntry) -> bool {
        self.probe.probe(candidate).await.is_alive()
    }

    /// Rebuild the pool from scratch and return the new working sequence.
    pub async fn refresh(&self, max_to_test: usize) -> Vec<ProxyEntry> {
        self.refresh_with_report(max_to_test).await.0
    }

    /// Same as [`ProxyPoolManager::refresh`] using the configured cap.
    pub async fn refresh_default(&self) -> RefreshReport {
        self.refresh_with_report(self.config.max_to_test).await.1
    }

    pub async fn refresh_with_report(&self, max_to_test: usize) -> (Vec<ProxyEntry>, RefreshReport) {
        let _refreshing = self.refresh_lock.lock().await;
        let started = Instant::now();

        log::info!("clearing proxy pool before refresh");
        {
            let mut guard = self.state.lock().expect("proxy pool lock poisoned");
            guard.candidates = CandidateLists::default();
            guard.working.clear();
            guard.last_working = None;
        }

        self.fetch_candidates().await;

        let (fetched, mut candidates) = {
            let guard = self.state.lock().expect("proxy pool lock poisoned");
            (guard.candidates.total(), guard.candidates.concat())
        };

        if candidates.len() > max_to_test {
            log::info!("limiting probe run to {max_to_test} of {fetched} candidates");
            candidates.truncate(max_to_test);
        }

        if candidates.is_empty() {
            log::warn!("no proxy candidates fetched, continuing with direct connections");
            let report = RefreshReport::new(fetched, 0, 0, started.elapsed());
            self.state.lock().expect("proxy pool lock poisoned").last_refresh = Some(report.clone());
            return (Vec::new(), report);
        }

        log::info!("probing {} proxy candidates", candidates.len());
        let tested = candidates.len();
        let working = self.probe_all(candidates).await;

        let report = RefreshReport::new(fetched, tested, working.len(), started.elapsed());
        {
            let mut guard = self.state.lock().expect("proxy pool lock poisoned");
            guard.working = working.clone();
            guard.last_working = None;
            guard.last_refresh = Some(report.clone());
        }

        log::info!(
            "proxy refresh complete: fetched={} tested={} working={} failed={} success_rate={:.1}% in {:.1}s",
            report.fetched,
            report.tested,
            report.working,
            report.failed,
            report.success_rate,
            report.duration.as_secs_f64()
        );

        (working, report)
    }

    /// Probe all candidates with at most `probe_concurrency` in flight and
    /// return the live ones in candidate order.
    async fn probe_all(&self, candidates: Vec<ProxyEntry>) -> Vec<ProxyEntry> {
        let semaphore = Arc::new(Semaphore::new(self.config.probe_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let probe = self.probe.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, candidate, ProbeOutcome::Failed(TransportErrorKind::Other));
                };
                let outcome = probe.probe(&candidate).await;
                (index, candidate, outcome)
            });
        }

        let mut alive = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, candidate, outcome)) if outcome.is_alive() => {
                    alive.push((index, candidate));
                }
                Ok(_) => {}
                Err(err) => log::warn!("proxy probe task aborted: {err}"),
            }
        }

        alive.sort_by_key(|(index, _)| *index);
        alive.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// Snapshot of the working sequence in insertion order.
    pub fn working(&self) -> Vec<ProxyEntry> {
        self.state
            .lock()
            .expect("proxy pool lock poisoned")
            .working
            .clone()
    }

    /// Most recently added working proxy.
    pub fn latest(&self) -> Option<ProxyEntry> {
        self.state
            .lock()
            .expect("proxy pool lock poisoned")
            .working
            .last()
            .cloned()
    }

    pub fn last_working(&self) -> Option<ProxyEntry> {
        self.state
            .lock()
            .expect("proxy pool lock poisoned")
            .last_working
            .clone()
    }

    pub fn stats(&self) -> PoolStats {
        let guard = self.state.lock().expect("proxy pool lock poisoned");
        PoolStats {
            working: guard.working.len(),
            socks4_candidates: guard.candidates.len(ProxyProtocol::Socks4),
            socks5_candidates: guard.candidates.len(ProxyProtocol::Socks5),
            http_candidates: guard.candidates.len(ProxyProtocol::Http),
            last_working: guard.last_working.clone(),
            last_refresh: guard.last_refresh.clone(),
        }
    }
}

impl ProxyPool for ProxyPoolManager {
    fn acquire(&self, selection: Selection) -> Option<ProxyEntry> {
        let guard = self.state.lock().expect("proxy pool lock poisoned");
        if let Some(proxy) = &guard.last_working {
            return Some(proxy.clone());
        }
        match selection {
            Selection::Random => guard.working.choose(&mut rand::thread_rng()).cloned(),
            Selection::Latest => guard.working.last().cloned(),
        }
    }

    fn report_success(&self, proxy: &ProxyEntry) {
        let mut guard = self.state.lock().expect("proxy pool lock poisoned");
        // A fetch that outlived a refresh may report a proxy that is gone.
        if guard.working.contains(proxy) {
            guard.last_working = Some(proxy.clone());
        }
    }

    fn report_failure(&self, proxy: &ProxyEntry) -> bool {
        let mut guard = self.state.lock().expect("proxy pool lock poisoned");
        if guard.last_working.as_ref() == Some(proxy) {
            guard.last_working = None;
        }
        let before = guard.working.len();
        guard.working.retain(|entry| entry != proxy);
        guard.working.len() != before
    }

    fn working_len(&self) -> usize {
        self.state
            .lock()
            .expect("proxy pool lock poisoned")
            .working
            .len()
    }
}
