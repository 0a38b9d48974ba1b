//! Public proxy list sources.
//!
//! Two formats are supported: line-delimited `host:port` text lists published
//! per protocol, and the geonode JSON API whose entries carry a `protocols`
//! array.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::fetch::transport::{HttpTransport, TransportError, TransportRequest};

use super::{ProxyEntry, ProxyProtocol};

pub const SPEEDX_LIST_TEMPLATE: &str =
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/refs/heads/master/{protocol}.txt";
pub const GEONODE_API_URL: &str = "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc";

const SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A remote list of proxy candidates.
#[async_trait]
pub trait ProxySource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, transport: &dyn HttpTransport) -> Result<Vec<ProxyEntry>, SourceError>;
}

async fn download(transport: &dyn HttpTransport, url: &str) -> Result<String, SourceError> {
    let url = Url::parse(url)?;
    let headers = HeaderMap::new();
    let response = transport
        .get(TransportRequest {
            url: &url,
            headers: &headers,
            proxy: None,
            timeout: SOURCE_TIMEOUT,
        })
        .await?;
    if !(200..300).contains(&response.status) {
        return Err(SourceError::Status(response.status));
    }
    Ok(response.text())
}

/// Line-delimited `host:port` list for a single protocol.
#[derive(Debug, Clone)]
pub struct PlainTextListSource {
    name: String,
    protocol: ProxyProtocol,
    url: String,
}

impl PlainTextListSource {
    pub fn new(protocol: ProxyProtocol, url: impl Into<String>) -> Self {
        Self {
            name: format!("plain-text/{protocol}"),
            protocol,
            url: url.into(),
        }
    }

    /// One source per protocol, with `{protocol}` in the template substituted.
    pub fn per_protocol(template: &str) -> Vec<Self> {
        ProxyProtocol::ALL
            .iter()
            .map(|protocol| Self::new(*protocol, template.replace("{protocol}", protocol.as_str())))
            .collect()
    }

    pub fn protocol(&self) -> ProxyProtocol {
        self.protocol
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Parse a text list. Blank and malformed lines are skipped.
pub fn parse_plain_text_list(protocol: ProxyProtocol, body: &str) -> Vec<ProxyEntry> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match ProxyEntry::from_address(protocol, line) {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("skipping proxy list line: {err}");
                None
            }
        })
        .collect()
}

#[async_trait]
impl ProxySource for PlainTextListSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, transport: &dyn HttpTransport) -> Result<Vec<ProxyEntry>, SourceError> {
        let body = download(transport, &self.url).await?;
        Ok(parse_plain_text_list(self.protocol, &body))
    }
}

#[derive(Debug, Deserialize)]
struct GeonodeResponse {
    #[serde(default)]
    data: Vec<GeonodeEntry>,
}

#[derive(Debug, Deserialize)]
struct GeonodeEntry {
    ip: String,
    port: GeonodePort,
    #[serde(default)]
    protocols: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeonodePort {
    Number(u16),
    Text(String),
}

impl GeonodePort {
    fn value(&self) -> Option<u16> {
        match self {
            GeonodePort::Number(port) => Some(*port),
            GeonodePort::Text(port) => port.trim().parse().ok(),
        }
    }
}

/// Geonode JSON proxy API.
#[derive(Debug, Clone)]
pub struct GeonodeSource {
    url: String,
}

impl GeonodeSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for GeonodeSource {
    fn default() -> Self {
        Self::new(GEONODE_API_URL)
    }
}

/// Parse a geonode payload. Each entry is filed under the first supported
/// protocol it advertises, checked in socks4, socks5, http order.
pub fn parse_geonode_payload(body: &str) -> Result<Vec<ProxyEntry>, SourceError> {
    let payload: GeonodeResponse = serde_json::from_str(body)?;
    let entries = payload
        .data
        .into_iter()
        .filter_map(|entry| {
            let protocol = ProxyProtocol::ALL.into_iter().find(|protocol| {
                entry
                    .protocols
                    .iter()
                    .any(|advertised| advertised.eq_ignore_ascii_case(protocol.as_str()))
            })?;
            let port = entry.port.value()?;
            if entry.ip.trim().is_empty() {
                return None;
            }
            Some(ProxyEntry::new(protocol, entry.ip.trim(), port))
        })
        .collect();
    Ok(entries)
}

#[async_trait]
impl ProxySource for GeonodeSource {
    fn name(&self) -> &str {
        "geonode"
    }

    async fn fetch(&self, transport: &dyn HttpTransport) -> Result<Vec<ProxyEntry>, SourceError> {
        let body = download(transport, &self.url).await?;
        parse_geonode_payload(&body)
    }
}

/// The default source set: one text list per protocol plus geonode.
pub fn default_sources() -> Vec<Arc<dyn ProxySource>> {
    let mut sources: Vec<Arc<dyn ProxySource>> = PlainTextListSource::per_protocol(SPEEDX_LIST_TEMPLATE)
        .into_iter()
        .map(|source| Arc::new(source) as Arc<dyn ProxySource>)
        .collect();
    sources.push(Arc::new(GeonodeSource::default()));
    sources
}
