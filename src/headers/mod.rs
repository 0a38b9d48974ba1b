//! Browser header profiles.
//!
//! Produces the request headers sent on each hop and the headers a player or
//! downloader must replay to fetch a resolved stream. Everything here is a
//! pure function of its inputs.

use std::collections::HashMap;

use http::header::{ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

pub const CHROME_120_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const CHROME_120_SEC_CH_UA: &str =
    r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#;
const DOCUMENT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Page fetched during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hop {
    /// The embed host page for a movie id.
    Embed,
    /// Player wrapper revealing the playback wrapper path.
    PlayerWrapper,
    /// Playback wrapper carrying the stream templates.
    PlaybackWrapper,
}

impl Hop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hop::Embed => "embed",
            Hop::PlayerWrapper => "player_wrapper",
            Hop::PlaybackWrapper => "playback_wrapper",
        }
    }
}

/// Supplies headers for page hops and playback.
pub trait HeaderBuilder: Send + Sync {
    fn page_headers(&self, hop: Hop, referer: &str) -> HeaderMap;

    fn playback_headers(&self, url: &str, origin: &str, referer: &str) -> HashMap<String, String>;
}

/// Desktop Chrome 120 header profile.
#[derive(Debug, Clone)]
pub struct BrowserHeaders {
    user_agent: String,
    accept_language: String,
}

impl BrowserHeaders {
    pub fn new() -> Self {
        Self {
            user_agent: CHROME_120_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.accept_language = accept_language.into();
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl Default for BrowserHeaders {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderBuilder for BrowserHeaders {
    fn page_headers(&self, hop: Hop, referer: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, &self.user_agent);
        headers.insert(ACCEPT, HeaderValue::from_static(DOCUMENT_ACCEPT));
        insert(&mut headers, ACCEPT_LANGUAGE, &self.accept_language);
        insert(&mut headers, REFERER, referer);
        insert_client_hints(&mut headers);

        let (dest, site) = match hop {
            Hop::Embed => ("document", "same-origin"),
            Hop::PlayerWrapper => ("iframe", "cross-site"),
            Hop::PlaybackWrapper => ("iframe", "same-origin"),
        };
        headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static(dest));
        headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("navigate"));
        headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static(site));
        headers.insert(
            HeaderName::from_static("upgrade-insecure-requests"),
            HeaderValue::from_static("1"),
        );
        headers
    }

    fn playback_headers(&self, url: &str, origin: &str, referer: &str) -> HashMap<String, String> {
        let site = if origin_of(url).as_deref() == Some(origin.trim_end_matches('/')) {
            "same-origin"
        } else {
            "cross-site"
        };

        HashMap::from([
            ("User-Agent".to_string(), self.user_agent.clone()),
            ("Accept".to_string(), "*/*".to_string()),
            ("Accept-Language".to_string(), self.accept_language.clone()),
            ("Origin".to_string(), origin.to_string()),
            ("Referer".to_string(), referer.to_string()),
            ("sec-ch-ua".to_string(), CHROME_120_SEC_CH_UA.to_string()),
            ("sec-ch-ua-mobile".to_string(), "?0".to_string()),
            ("sec-ch-ua-platform".to_string(), "\"macOS\"".to_string()),
            ("Sec-Fetch-Dest".to_string(), "empty".to_string()),
            ("Sec-Fetch-Mode".to_string(), "cors".to_string()),
            ("Sec-Fetch-Site".to_string(), site.to_string()),
        ])
    }
}

fn insert_client_hints(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("sec-ch-ua"),
        HeaderValue::from_static(CHROME_120_SEC_CH_UA),
    );
    headers.insert(HeaderName::from_static("sec-ch-ua-mobile"), HeaderValue::from_static("?0"));
    headers.insert(
        HeaderName::from_static("sec-ch-ua-platform"),
        HeaderValue::from_static("\"macOS\""),
    );
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => log::warn!("dropping invalid {name} header value"),
    }
}

/// `scheme://host[:port]` of a URL, if it parses.
pub fn origin_of(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let mut origin = format!("{}://{}", url.scheme(), url.host_str()?);
    if let Some(port) = url.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    Some(origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_headers_carry_referer_and_profile() {
        let builder = BrowserHeaders::new();
        let headers = builder.page_headers(Hop::PlayerWrapper, "https://vidsrc.xyz/embed/movie/tt1");
        assert_eq!(headers.get(REFERER).unwrap(), "https://vidsrc.xyz/embed/movie/tt1");
        assert_eq!(headers.get(USER_AGENT).unwrap(), CHROME_120_USER_AGENT);
        assert_eq!(headers.get("sec-fetch-dest").unwrap(), "iframe");
        assert_eq!(headers.get("sec-fetch-site").unwrap(), "cross-site");
    }

    #[test]
    fn invalid_referer_is_dropped() {
        let headers = BrowserHeaders::new().page_headers(Hop::Embed, "bad\nvalue");
        assert!(headers.get(REFERER).is_none());
        assert!(headers.get(USER_AGENT).is_some());
    }

    #[test]
    fn playback_headers_are_deterministic() {
        let builder = BrowserHeaders::new();
        let first = builder.playback_headers(
            "https://d1.example/a.m3u8",
            "https://cloudnestra.com",
            "https://cloudnestra.com/",
        );
        let second = builder.playback_headers(
            "https://d1.example/a.m3u8",
            "https://cloudnestra.com",
            "https://cloudnestra.com/",
        );
        assert_eq!(first, second);
        assert_eq!(first["Origin"], "https://cloudnestra.com");
        assert_eq!(first["Referer"], "https://cloudnestra.com/");
        assert_eq!(first["Sec-Fetch-Site"], "cross-site");
    }

    #[test]
    fn origin_keeps_explicit_port() {
        assert_eq!(origin_of("http://127.0.0.1:8080/x").as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(origin_of("https://cloudnestra.com/rcp/1").as_deref(), Some("https://cloudnestra.com"));
        assert!(origin_of("not a url").is_none());
    }
}
