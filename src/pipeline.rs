//! Multi-hop stream resolution.
//!
//! Walks embed page -> player wrapper -> playback wrapper and turns the
//! playback wrapper's templates into [`StreamCandidate`]s. Each hop sends the
//! previous hop's URL as its referer.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::extract::{self, PLAYER_HOST, StreamCandidate};
use crate::fetch::ResilientFetcher;
use crate::headers::{HeaderBuilder, Hop};
use crate::modules::events::{PipelineFailedEvent, ResolverEvent, StageEvent};

pub const DEFAULT_EMBED_BASE: &str = "https://vidsrc.xyz";

/// Hosts and fixed headers used along the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEndpoints {
    pub embed_base: String,
    pub player_host: String,
    pub playback_origin: String,
    pub playback_referer: String,
}

impl PipelineEndpoints {
    /// Referer for the embed hop: the embed host root.
    pub fn embed_referer(&self) -> String {
        format!("{}/", self.embed_base.trim_end_matches('/'))
    }

    pub fn movie_url(&self, imdb_id: &str) -> String {
        format!("{}/embed/movie/{imdb_id}", self.embed_base.trim_end_matches('/'))
    }
}

impl Default for PipelineEndpoints {
    fn default() -> Self {
        Self {
            embed_base: DEFAULT_EMBED_BASE.to_string(),
            player_host: PLAYER_HOST.to_string(),
            playback_origin: PLAYER_HOST.to_string(),
            playback_referer: format!("{PLAYER_HOST}/"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Start,
    EmbedFetched,
    Wrapper1Fetched,
    Wrapper2Fetched,
    Resolved,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Start => "start",
            PipelineStage::EmbedFetched => "embed_fetched",
            PipelineStage::Wrapper1Fetched => "wrapper1_fetched",
            PipelineStage::Wrapper2Fetched => "wrapper2_fetched",
            PipelineStage::Resolved => "resolved",
        }
    }
}

/// Why a resolution stopped. Each variant names the step that failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineFailure {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to fetch embed page")]
    EmbedFetch,
    #[error("failed to extract player iframe src")]
    PlayerIframeMissing,
    #[error("failed to fetch player wrapper")]
    PlayerFetch,
    #[error("failed to extract playback wrapper path")]
    ProrcpMissing,
    #[error("failed to fetch playback wrapper")]
    PlaybackFetch,
    #[error("no streaming urls found")]
    NoStreams,
}

impl PipelineFailure {
    /// Last stage reached before the failure.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineFailure::InvalidUrl { .. } | PipelineFailure::EmbedFetch => PipelineStage::Start,
            PipelineFailure::PlayerIframeMissing | PipelineFailure::PlayerFetch => {
                PipelineStage::EmbedFetched
            }
            PipelineFailure::ProrcpMissing | PipelineFailure::PlaybackFetch => {
                PipelineStage::Wrapper1Fetched
            }
            PipelineFailure::NoStreams => PipelineStage::Wrapper2Fetched,
        }
    }
}

#[derive(Clone)]
pub struct ResolutionPipeline {
    fetcher: ResilientFetcher,
    headers: Arc<dyn HeaderBuilder>,
    endpoints: PipelineEndpoints,
}

impl ResolutionPipeline {
    pub fn new(
        fetcher: ResilientFetcher,
        headers: Arc<dyn HeaderBuilder>,
        endpoints: PipelineEndpoints,
    ) -> Self {
        Self {
            fetcher,
            headers,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &PipelineEndpoints {
        &self.endpoints
    }

    /// Resolve all playable streams behind an embed page URL.
    pub async fn run(&self, embed_url: &str) -> Result<Vec<StreamCandidate>, PipelineFailure> {
        let result = self.run_stages(embed_url).await;
        if let Err(failure) = &result {
            self.fetcher.events().dispatch(ResolverEvent::PipelineFailed(PipelineFailedEvent {
                stage: failure.stage().as_str(),
                reason: failure.to_string(),
                url: embed_url.to_string(),
                timestamp: chrono::Utc::now(),
            }));
        }
        result
    }

    async fn run_stages(&self, embed_url: &str) -> Result<Vec<StreamCandidate>, PipelineFailure> {
        let embed = parse_url(embed_url)?;
        log::info!("fetching embed page {embed}");

        let embed_headers = self
            .headers
            .page_headers(Hop::Embed, &self.endpoints.embed_referer());
        let embed_html = self
            .fetcher
            .get(&embed, &embed_headers)
            .await
            .ok_or(PipelineFailure::EmbedFetch)?;
        self.reached(PipelineStage::EmbedFetched, embed.as_str());

        let wrapper1 = extract::extract_iframe_src(&embed_html)
            .ok_or(PipelineFailure::PlayerIframeMissing)?;
        let wrapper1 = parse_url(&wrapper1)?;
        log::info!("player wrapper: {wrapper1}");

        let wrapper1_headers = self
            .headers
            .page_headers(Hop::PlayerWrapper, embed.as_str());
        let wrapper1_html = self
            .fetcher
            .get(&wrapper1, &wrapper1_headers)
            .await
            .ok_or(PipelineFailure::PlayerFetch)?;
        self.reached(PipelineStage::Wrapper1Fetched, wrapper1.as_str());

        let wrapper2 = extract::extract_prorcp_path_on(&wrapper1_html, &self.endpoints.player_host)
            .ok_or(PipelineFailure::ProrcpMissing)?;
        let wrapper2 = parse_url(&wrapper2)?;
        log::info!("playback wrapper: {wrapper2}");

        let wrapper2_headers = self
            .headers
            .page_headers(Hop::PlaybackWrapper, wrapper1.as_str());
        let wrapper2_html = self
            .fetcher
            .get(&wrapper2, &wrapper2_headers)
            .await
            .ok_or(PipelineFailure::PlaybackFetch)?;
        self.reached(PipelineStage::Wrapper2Fetched, wrapper2.as_str());

        let origin = &self.endpoints.playback_origin;
        let referer = &self.endpoints.playback_referer;
        let streams = extract::extract_stream_templates(&wrapper2_html, |url| {
            self.headers.playback_headers(url, origin, referer)
        });
        if streams.is_empty() {
            return Err(PipelineFailure::NoStreams);
        }

        self.reached(PipelineStage::Resolved, wrapper2.as_str());
        log::info!("resolved {} stream(s) from {embed}", streams.len());
        Ok(streams)
    }

    fn reached(&self, stage: PipelineStage, url: &str) {
        self.fetcher.events().dispatch(ResolverEvent::Stage(StageEvent {
            stage: stage.as_str(),
            url: url.to_string(),
            timestamp: chrono::Utc::now(),
        }));
    }
}

fn parse_url(raw: &str) -> Result<Url, PipelineFailure> {
    Url::parse(raw).map_err(|err| PipelineFailure::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })
}
