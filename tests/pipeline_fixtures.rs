use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vidsrc_resolver::modules::proxy::sources::{ProxySource, SourceError};
use vidsrc_resolver::{
    HttpTransport, LivenessProbe, ProxyEntry, ResolverConfig, StreamResolver, TransportError,
    TransportRequest, TransportResponse,
};

const EMBED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Movie</title></head>
<body>
  <div id="player">
    <iframe id="player_iframe" src="//cloudnestra.com/rcp/ZmlsZTE=" frameborder="0" allowfullscreen></iframe>
  </div>
  <div class="servers"><div class="server" data-hash="abc">CloudStream Pro</div></div>
</body>
</html>"#;

const PLAYER_WRAPPER: &str = r#"<html><body>
<div id="the_frame"></div>
<script>
  $(document).ready(function() {
    $('#pl_but').click(function() {
      $('#the_frame').removeAttr('style');
      $('#the_frame').html('<iframe id="player_iframe" allowfullscreen></iframe>');
      $('#player_iframe').attr({ src: '/prorcp/YTYzZmJlNzQ=', frameborder: '0' });
    });
  });
</script>
</body></html>"#;

const PLAYBACK_WRAPPER: &str = r#"<html><body>
<div id="player_parent"></div>
<script>
  var test_doms = [
    "https://tmstr2.shadowlandschronicles.com",
    "https://tmstr2.cloudnestra.com",
    "https://tmstr2.putgate.org"
  ];
  var player = new Playerjs({
    id: "player_parent",
    file: "https://tmstr2.{v1}/pl/H4sIAAAA/master.m3u8 or {v2}/pl/H4sIAAAA/master.m3u8 or {v7}/pl/gone/master.m3u8",
    cuid: "a1b2c3"
  });
</script>
</body></html>"#;

/// Serves the three fixture pages by path. Requests through `bad_proxy`
/// get a 502.
struct FixtureSite {
    pages: HashMap<&'static str, &'static str>,
    bad_proxy: Option<&'static str>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl FixtureSite {
    fn new(bad_proxy: Option<&'static str>) -> Self {
        Self {
            pages: HashMap::from([
                ("/embed/movie/tt5433140", EMBED_PAGE),
                ("/rcp/ZmlsZTE=", PLAYER_WRAPPER),
                ("/prorcp/YTYzZmJlNzQ=", PLAYBACK_WRAPPER),
            ]),
            bad_proxy,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpTransport for FixtureSite {
    async fn get(&self, request: TransportRequest<'_>) -> Result<TransportResponse, TransportError> {
        let proxy = request.proxy.map(|p| p.host().to_string());
        self.requests
            .lock()
            .unwrap()
            .push((request.url.to_string(), proxy.clone()));

        if proxy.is_some() && proxy.as_deref() == self.bad_proxy {
            return Ok(TransportResponse::new(502, Vec::new(), request.url.clone()));
        }
        let (status, body) = match self.pages.get(request.url.path()) {
            Some(body) => (200, *body),
            None => (404, "not found"),
        };
        Ok(TransportResponse::new(status, body.as_bytes().to_vec(), request.url.clone()))
    }
}

/// Probe target stand-in: every proxy answers except `dead`.
struct ProbeSite {
    dead: &'static str,
}

#[async_trait]
impl HttpTransport for ProbeSite {
    async fn get(&self, request: TransportRequest<'_>) -> Result<TransportResponse, TransportError> {
        match request.proxy {
            Some(proxy) if proxy.host() == self.dead => {
                Err(TransportError::Connect("connection refused".into()))
            }
            _ => Ok(TransportResponse::new(200, "203.0.113.7", request.url.clone())),
        }
    }
}

struct StaticList(Vec<&'static str>);

#[async_trait]
impl ProxySource for StaticList {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _transport: &dyn HttpTransport) -> Result<Vec<ProxyEntry>, SourceError> {
        Ok(self.0.iter().filter_map(|raw| raw.parse().ok()).collect())
    }
}

fn fast_config() -> ResolverConfig {
    ResolverConfig {
        backoff_base_ms: 1,
        ..ResolverConfig::default()
    }
}

#[tokio::test]
async fn resolves_fixture_chain_directly() {
    let site = Arc::new(FixtureSite::new(None));
    let resolver = StreamResolver::builder()
        .with_config(fast_config())
        .with_transport(site.clone())
        .with_proxy_sources(Vec::new())
        .disable_proxies()
        .build()
        .unwrap();

    let outcome = resolver.resolve("tt5433140").await;
    assert!(outcome.success, "{:?}", outcome.reason);
    let urls: Vec<&str> = outcome.streams.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://tmstr2.shadowlandschronicles.com/pl/H4sIAAAA/master.m3u8",
            "https://tmstr2.cloudnestra.com/pl/H4sIAAAA/master.m3u8",
        ]
    );
    for stream in &outcome.streams {
        assert!(!stream.url.contains("{v"));
        assert!(!stream.headers.is_empty());
        assert_eq!(stream.headers["Referer"], "https://cloudnestra.com/");
        assert!(stream.is_hls());
    }

    let requested: Vec<String> = site
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|(url, proxy)| {
            assert!(proxy.is_none());
            url.clone()
        })
        .collect();
    assert_eq!(
        requested,
        vec![
            "https://vidsrc.xyz/embed/movie/tt5433140",
            "https://cloudnestra.com/rcp/ZmlsZTE=",
            "https://cloudnestra.com/prorcp/YTYzZmJlNzQ=",
        ]
    );
}

#[tokio::test]
async fn resolves_through_refreshed_pool_and_evicts_bad_proxy() {
    let site = Arc::new(FixtureSite::new(Some("10.0.0.3")));
    let probe_target = "https://api.ipify.org".parse().unwrap();
    let probe = LivenessProbe::new(Arc::new(ProbeSite { dead: "10.0.0.2" }), probe_target);
    let resolver = StreamResolver::builder()
        .with_config(fast_config())
        .with_transport(site.clone())
        .with_proxy_sources(vec![Arc::new(StaticList(vec![
            "http://10.0.0.1:8080",
            "http://10.0.0.2:8080",
            "http://10.0.0.3:8080",
            "http://10.0.0.1:8080",
        ]))])
        .with_probe(Arc::new(probe))
        .build()
        .unwrap();

    let report = resolver.refresh_proxies().await;
    assert_eq!(report.fetched, 3);
    assert_eq!(report.working, 2);

    let outcome = resolver.resolve("tt5433140").await;
    assert!(outcome.success, "{:?}", outcome.reason);
    assert_eq!(outcome.streams.len(), 2);

    let stats = resolver.proxy_stats();
    assert_eq!(
        stats.pool.last_working.map(|p| p.to_string()).as_deref(),
        Some("http://10.0.0.1:8080")
    );
    let working: Vec<String> = resolver.pool().working().iter().map(ToString::to_string).collect();
    assert!(!working.contains(&"http://10.0.0.2:8080".to_string()));

    let requests = site.requests.lock().unwrap().clone();
    assert!(requests.iter().all(|(_, proxy)| proxy.is_some()));
    let last_two: Vec<Option<String>> = requests[requests.len() - 2..]
        .iter()
        .map(|(_, proxy)| proxy.clone())
        .collect();
    assert_eq!(last_two, vec![Some("10.0.0.1".to_string()); 2]);
}

#[tokio::test]
async fn unknown_movie_reports_embed_failure() {
    let site = Arc::new(FixtureSite::new(None));
    let resolver = StreamResolver::builder()
        .with_config(fast_config())
        .with_transport(site.clone())
        .disable_proxies()
        .build()
        .unwrap();

    let outcome = resolver.resolve("tt0000001").await;
    assert!(!outcome.success);
    assert!(outcome.streams.is_empty());
    assert_eq!(outcome.reason.as_deref(), Some("failed to fetch embed page"));
    assert_eq!(site.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_resolutions_share_one_pool() {
    let site = Arc::new(FixtureSite::new(Some("10.0.0.3")));
    let probe_target = "https://api.ipify.org".parse().unwrap();
    let probe = LivenessProbe::new(Arc::new(ProbeSite { dead: "10.0.0.2" }), probe_target);
    let resolver = StreamResolver::builder()
        .with_config(fast_config())
        .with_transport(site.clone())
        .with_proxy_sources(vec![Arc::new(StaticList(vec![
            "http://10.0.0.1:8080",
            "http://10.0.0.2:8080",
            "http://10.0.0.3:8080",
        ]))])
        .with_probe(Arc::new(probe))
        .build()
        .unwrap();
    resolver.refresh_proxies().await;

    let (first, second) = tokio::join!(resolver.resolve("tt5433140"), resolver.resolve("tt5433140"));
    assert!(first.success, "{:?}", first.reason);
    assert!(second.success, "{:?}", second.reason);
    assert_eq!(first.streams, second.streams);

    let working: Vec<String> = resolver.pool().working().iter().map(ToString::to_string).collect();
    assert!(!working.contains(&"http://10.0.0.3:8080".to_string()));
    assert!(working.contains(&"http://10.0.0.1:8080".to_string()));

    let stats = resolver.proxy_stats();
    assert_eq!(
        stats.pool.last_working.map(|p| p.to_string()).as_deref(),
        Some("http://10.0.0.1:8080")
    );
    assert_eq!(stats.metrics.unwrap().global.resolutions, 2);
}
