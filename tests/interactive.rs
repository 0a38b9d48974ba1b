//! Live smoke test against the real hosts and proxy lists.
//!
//! Run with `cargo test --test interactive -- --ignored --nocapture`.
//! Set `VIDSRC_IMDB_ID` to try a different title and `VIDSRC_DIRECT=1` to
//! skip the proxy pool.

use std::env;
use std::time::Duration;

use vidsrc_resolver::{ResolverConfig, StreamResolver, VERSION};

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).map(|v| v.trim().to_ascii_lowercase()),
        Ok(ref v) if v == "1" || v == "true" || v == "yes"
    )
}

#[tokio::test]
#[ignore = "hits vidsrc, cloudnestra and public proxy lists"]
async fn resolve_live_title() {
    let imdb_id = env::var("VIDSRC_IMDB_ID").unwrap_or_else(|_| "tt5433140".to_string());
    let direct = env_flag("VIDSRC_DIRECT");

    println!("vidsrc-resolver {VERSION}");

    let config = ResolverConfig {
        max_proxies_to_test: 100,
        ..ResolverConfig::default()
    };
    let mut builder = StreamResolver::builder().with_config(config);
    if direct {
        builder = builder.disable_proxies();
    }
    let resolver = builder.build().expect("resolver builds");

    if !direct {
        let report = tokio::time::timeout(Duration::from_secs(180), resolver.refresh_proxies())
            .await
            .expect("proxy refresh finished in time");
        println!(
            "proxies: fetched={} tested={} working={} ({:.1}%)",
            report.fetched, report.tested, report.working, report.success_rate
        );
    }

    let outcome = resolver.resolve(&imdb_id).await;
    println!("{}", serde_json::to_string_pretty(&outcome).expect("outcome serializes"));

    let stats = resolver.proxy_stats();
    println!("{}", serde_json::to_string_pretty(&stats).expect("stats serialize"));

    if outcome.success {
        assert!(!outcome.streams.is_empty());
        assert!(outcome.streams.iter().all(|s| !s.url.contains("{v")));
    }
}
