//! Markup and inline-script extraction for the resolution hops.
//!
//! All functions are pure: they take page text and return what they found.
//! Only the embed page is parsed as a DOM; the wrapper pages keep the data we
//! need inside inline script, so those are scanned with regular expressions.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::HashMap;

/// `id` of the iframe on the embed page that points at the player wrapper.
pub const PLAYER_IFRAME_ID: &str = "player_iframe";
/// Host serving the player and playback wrappers.
pub const PLAYER_HOST: &str = "https://cloudnestra.com";
/// Script variable holding the stream domain list.
pub const DOMAIN_LIST_VARIABLE: &str = "test_doms";
/// Separator between alternative stream templates.
pub const TEMPLATE_SEPARATOR: &str = " or ";

/// A resolved stream plus the headers required to play it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamCandidate {
    pub url: String,
    pub headers: HashMap<String, String>,
}

impl StreamCandidate {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            url: url.into(),
            headers,
        }
    }

    pub fn is_hls(&self) -> bool {
        self.url.to_ascii_lowercase().contains(".m3u8")
    }
}

static PLAYER_IFRAME_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(&format!(r#"iframe[id="{PLAYER_IFRAME_ID}"]"#))
        .expect("invalid player iframe selector")
});

static PRORCP_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"src:\s*['"](/prorcp/.*?)['"]"#).expect("invalid prorcp regex")
});

static FILE_TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"file:\s*"([^"]+)""#).expect("invalid file template regex")
});

static DOMAIN_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(&format!(r#"var\s+{DOMAIN_LIST_VARIABLE}\s*=\s*\[(.*?)\];"#))
        .dot_matches_new_line(true)
        .build()
        .expect("invalid domain block regex")
});

static DOMAIN_ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["'](https?://.*?)["']"#).expect("invalid domain entry regex")
});

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{v(\d+)\}").expect("invalid placeholder regex")
});

/// Source of the player iframe on the embed page, with protocol-relative
/// URLs upgraded to https.
pub fn extract_iframe_src(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let Some(iframe) = document.select(&PLAYER_IFRAME_SELECTOR).next() else {
        log::warn!("embed page has no iframe with id '{PLAYER_IFRAME_ID}'");
        return None;
    };

    let src = iframe.value().attr("src").map(str::trim).filter(|src| !src.is_empty());
    let Some(src) = src else {
        log::warn!("player iframe has no src attribute");
        return None;
    };

    if let Some(rest) = src.strip_prefix("//") {
        Some(format!("https://{rest}"))
    } else {
        Some(src.to_string())
    }
}

/// Playback wrapper URL embedded in the player wrapper's inline script.
pub fn extract_prorcp_path(html: &str) -> Option<String> {
    extract_prorcp_path_on(html, PLAYER_HOST)
}

/// Like [`extract_prorcp_path`] but joins the path onto `host`.
pub fn extract_prorcp_path_on(html: &str, host: &str) -> Option<String> {
    let path = PRORCP_SRC_RE.captures(html)?.get(1)?.as_str();
    Some(format!("{}{path}", host.trim_end_matches('/')))
}

/// Every quoted http(s) URL inside the `test_doms` array literal, in order.
pub fn extract_domain_list(html: &str) -> Vec<String> {
    let Some(block) = DOMAIN_BLOCK_RE.captures(html).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };
    DOMAIN_ENTRY_RE
        .captures_iter(block.as_str())
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Template URLs from the first `file: "..."` declaration.
pub fn extract_file_templates(html: &str) -> Vec<String> {
    let Some(value) = FILE_TEMPLATE_RE.captures(html).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };
    value
        .as_str()
        .split(TEMPLATE_SEPARATOR)
        .map(str::to_string)
        .collect()
}

/// Substitute the `{vN}` placeholder with `domains[N - 1]`, keeping the text
/// after the placeholder verbatim. `None` if there is no placeholder or N is
/// out of range.
pub fn resolve_template(template: &str, domains: &[String]) -> Option<String> {
    let caps = PLACEHOLDER_RE.captures(template)?;
    let placeholder = caps.get(0)?;
    let index = caps.get(1)?.as_str().parse::<usize>().ok()?.checked_sub(1)?;
    let domain = domains.get(index)?;
    Some(format!("{domain}{}", &template[placeholder.end()..]))
}

/// Resolve all stream templates on the playback wrapper page. Templates that
/// fail to resolve are skipped; `headers_for` supplies playback headers for
/// each surviving URL.
pub fn extract_stream_templates<F>(html: &str, mut headers_for: F) -> Vec<StreamCandidate>
where
    F: FnMut(&str) -> HashMap<String, String>,
{
    let domains = extract_domain_list(html);
    let templates = extract_file_templates(html);
    if templates.is_empty() {
        log::warn!("playback page has no file template");
        return Vec::new();
    }

    templates
        .iter()
        .filter_map(|template| match resolve_template(template, &domains) {
            Some(url) => Some(url),
            None => {
                log::debug!("dropping unresolvable stream template {template}");
                None
            }
        })
        .map(|url| {
            let headers = headers_for(&url);
            StreamCandidate::new(url, headers)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn test_headers(url: &str) -> HashMap<String, String> {
        HashMap::from([("Referer".to_string(), format!("for {url}"))])
    }

    #[test]
    fn iframe_src_upgrades_protocol_relative() {
        let html = r#"<html><body><iframe id="player_iframe" src="//host/path"></iframe></body></html>"#;
        assert_eq!(extract_iframe_src(html).as_deref(), Some("https://host/path"));
    }

    #[test]
    fn iframe_src_picks_the_player_iframe() {
        let html = r#"
            <iframe id="ads" src="https://ads.example/x"></iframe>
            <iframe src="https://cloudnestra.com/rcp/abc" id="player_iframe" allowfullscreen></iframe>
            <iframe id="player_iframe" src="https://second.example/"></iframe>
        "#;
        assert_eq!(
            extract_iframe_src(html).as_deref(),
            Some("https://cloudnestra.com/rcp/abc")
        );
    }

    #[test]
    fn iframe_src_missing() {
        assert!(extract_iframe_src("<iframe id='other' src='//x/y'></iframe>").is_none());
        assert!(extract_iframe_src("<iframe id='player_iframe'></iframe>").is_none());
    }

    #[test]
    fn prorcp_path_in_either_quote_style() {
        assert_eq!(
            extract_prorcp_path(r#"loadIframe({ src: "/prorcp/abc123" })"#).as_deref(),
            Some("https://cloudnestra.com/prorcp/abc123")
        );
        assert_eq!(
            extract_prorcp_path("$('#the_frame').attr({src:   '/prorcp/Zm9v=='});").as_deref(),
            Some("https://cloudnestra.com/prorcp/Zm9v==")
        );
        assert!(extract_prorcp_path(r#"src: "/rcp/abc""#).is_none());
    }

    #[test]
    fn prorcp_path_on_custom_host() {
        assert_eq!(
            extract_prorcp_path_on(r#"src: "/prorcp/x""#, "http://127.0.0.1:9000/").as_deref(),
            Some("http://127.0.0.1:9000/prorcp/x")
        );
    }

    #[test]
    fn resolves_templates_against_domains() {
        let list = domains(&["https://d1.com", "https://d2.com"]);
        assert_eq!(
            resolve_template("{v2}/pl/H4sI/master.m3u8?x=1", &list).as_deref(),
            Some("https://d2.com/pl/H4sI/master.m3u8?x=1")
        );
        assert_eq!(
            resolve_template("https://old.example{v1}/a.m3u8", &list).as_deref(),
            Some("https://d1.com/a.m3u8")
        );
    }

    #[test]
    fn out_of_range_or_missing_placeholder_is_dropped() {
        let list = domains(&["https://d1.com"]);
        assert!(resolve_template("{v0}/a.m3u8", &list).is_none());
        assert!(resolve_template("{v2}/a.m3u8", &list).is_none());
        assert!(resolve_template("{v99999999999999999999999}/a.m3u8", &list).is_none());
        assert!(resolve_template("https://d9.com/a.m3u8", &list).is_none());
    }

    #[test]
    fn extracts_stream_templates() {
        let html = r#"
            <script>
            var test_doms = ["https://d1.com","https://d2.com"];
            var player = new Playerjs({id:"player_parent", file: "{v1}/a.m3u8 or {v2}/b.m3u8"});
            </script>
        "#;
        let streams = extract_stream_templates(html, test_headers);
        let urls: Vec<&str> = streams.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://d1.com/a.m3u8", "https://d2.com/b.m3u8"]);
        assert_eq!(streams[1].headers["Referer"], "for https://d2.com/b.m3u8");
        assert!(streams.iter().all(StreamCandidate::is_hls));
    }

    #[test]
    fn malformed_template_does_not_sink_the_batch() {
        let html = r#"
            var test_doms = [
                'https://d1.com',
                "not-a-url",
                "http://d2.com"
            ];
            file: "{v3}/gone.m3u8 or {v2}/kept.m3u8 or /no/placeholder.m3u8"
        "#;
        let streams = extract_stream_templates(html, test_headers);
        let urls: Vec<&str> = streams.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["http://d2.com/kept.m3u8"]);
    }

    #[test]
    fn missing_file_template_yields_nothing() {
        let html = r#"var test_doms = ["https://d1.com"];"#;
        assert!(extract_stream_templates(html, test_headers).is_empty());
        assert_eq!(extract_domain_list(html), domains(&["https://d1.com"]));
    }
}
