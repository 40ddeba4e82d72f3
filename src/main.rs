//! # news_fanout
//!
//! Runs one orchestration cycle over the configured news sources and prints
//! the requested feed page as JSON.
//!
//! ## Usage
//!
//! ```sh
//! news_fanout --config config/feed.yaml --page 1 --per-page 20
//! ```
//!
//! ## Pipeline
//!
//! 1. **Config**: load YAML, apply CLI/env overrides, validate
//! 2. **Wiring**: HTTP client, compliance gate, request limiter, adapters
//! 3. **Fan-out**: every enabled source concurrently, cached for the TTL
//! 4. **Output**: paginated feed page, optionally per-source health metrics

use clap::Parser;
use news_fanout::cli::Cli;
use news_fanout::compliance::{ComplianceGate, HttpRobotsSource};
use news_fanout::config::Settings;
use news_fanout::events::{EventSink, TracingSink};
use news_fanout::fetch::{DEFAULT_REQUEST_TIMEOUT, PageFetcher, RetryPolicy, build_client};
use news_fanout::{FeedService, Orchestrator, RateLimiter};
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_fanout starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut settings = Settings::load(&args.config)?;
    args.apply(&mut settings);
    settings.validate()?;
    info!(
        sources = ?settings.enabled_source_names(),
        mock = settings.use_mock,
        cache_ttl_minutes = settings.cache_ttl_minutes,
        "Configuration ready"
    );

    // ---- Wiring ----
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let client = build_client(&settings.user_agent, DEFAULT_REQUEST_TIMEOUT)?;
    let gate = Arc::new(ComplianceGate::with_events(
        settings.user_agent.clone(),
        settings.denylist()?,
        Arc::new(HttpRobotsSource::new(client.clone())),
        events.clone(),
    ));
    // Requests are limited per host, whole runs per source domain.
    let request_limiter = Arc::new(RateLimiter::with_events(
        settings.limiter_config(),
        events.clone(),
    ));
    let run_limiter = Arc::new(RateLimiter::with_events(
        settings.limiter_config(),
        events.clone(),
    ));
    let fetcher = Arc::new(PageFetcher::new(
        client,
        gate,
        request_limiter,
        RetryPolicy::default(),
    ));

    let orchestrator = Orchestrator::builder()
        .adapters(settings.build_adapters(fetcher)?)
        .limiter(run_limiter)
        .events(events)
        .cache_ttl(settings.cache_ttl())
        .adapter_timeout(settings.adapter_timeout())
        .build();
    let service = FeedService::new(Arc::new(orchestrator));

    // ---- Fan-out ----
    let page = service.get_feed(&args.query()).await;
    if page.total == 0 {
        warn!("Feed is empty; every source failed or returned nothing");
    }

    // ---- Output ----
    println!("{}", serde_json::to_string_pretty(&page)?);
    if args.metrics {
        let metrics = service.orchestrator().metrics().await;
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        articles = page.items.len(),
        total = page.total,
        "Execution complete"
    );
    Ok(())
}
