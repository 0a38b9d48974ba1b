//! Resolver configuration.
//!
//! [`ResolverConfig`] carries every tunable with a working default and can be
//! loaded from JSON. Missing fields fall back to their defaults, so a config
//! file only needs the values it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::extract::PLAYER_HOST;
use crate::fetch::RetryPolicy;
use crate::headers::CHROME_120_USER_AGENT;
use crate::modules::proxy::ProxyConfig;
use crate::modules::proxy::probe::IPIFY_URL;
use crate::modules::proxy::sources::{GEONODE_API_URL, SPEEDX_LIST_TEMPLATE};
use crate::pipeline::{DEFAULT_EMBED_BASE, PipelineEndpoints};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub embed_base: String,
    pub player_host: String,
    pub playback_origin: String,
    pub playback_referer: String,

    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub fetch_timeout_secs: u64,
    pub use_proxy: bool,

    pub max_proxies_to_test: usize,
    pub probe_concurrency: usize,
    pub probe_timeout_secs: u64,
    pub probe_url: String,
    pub refresh_interval_secs: u64,

    /// `{protocol}` is replaced with socks4, socks5 and http.
    pub plain_text_list_template: String,
    pub geonode_url: String,

    pub user_agent: String,
    pub accept_language: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            embed_base: DEFAULT_EMBED_BASE.to_string(),
            player_host: PLAYER_HOST.to_string(),
            playback_origin: PLAYER_HOST.to_string(),
            playback_referer: format!("{PLAYER_HOST}/"),
            max_retries: 3,
            backoff_base_ms: 1_000,
            fetch_timeout_secs: 10,
            use_proxy: true,
            max_proxies_to_test: 200,
            probe_concurrency: 50,
            probe_timeout_secs: 5,
            probe_url: IPIFY_URL.to_string(),
            refresh_interval_secs: 300,
            plain_text_list_template: SPEEDX_LIST_TEMPLATE.to_string(),
            geonode_url: GEONODE_API_URL.to_string(),
            user_agent: CHROME_120_USER_AGENT.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ResolverConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("embed_base", &self.embed_base),
            ("player_host", &self.player_host),
            ("probe_url", &self.probe_url),
            ("geonode_url", &self.geonode_url),
        ] {
            Url::parse(value).map_err(|err| ConfigError::Invalid {
                field,
                reason: err.to_string(),
            })?;
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_retries",
                reason: "must be at least 1".into(),
            });
        }
        if self.probe_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "probe_concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if !self.plain_text_list_template.contains("{protocol}") {
            return Err(ConfigError::Invalid {
                field: "plain_text_list_template",
                reason: "missing {protocol} placeholder".into(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            use_proxy: self.use_proxy,
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            max_to_test: self.max_proxies_to_test,
            probe_concurrency: self.probe_concurrency,
        }
    }

    pub fn endpoints(&self) -> PipelineEndpoints {
        PipelineEndpoints {
            embed_base: self.embed_base.clone(),
            player_host: self.player_host.clone(),
            playback_origin: self.playback_origin.clone(),
            playback_referer: self.playback_referer.clone(),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
