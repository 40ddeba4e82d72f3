//! Fan-out aggregator over every enabled source adapter.
//!
//! # Pipeline per adapter
//!
//! ```text
//! cache lookup ──hit──> cached articles
//!      │
//!     miss
//!      ▼
//! run limiter (source domain) ─> timeout ─> cache re-check ──hit──> cached articles
//!      │
//!     miss
//!      ▼
//! produce_articles (panic-isolated) ─> contract check ─> cache write (success only)
//!      │
//!      ▼
//! health monitor
//! ```
//!
//! All branches run concurrently and every outcome is collected before the
//! merge; a failed, slow or panicking adapter only removes its own articles.
//! The merged list is de-duplicated by `url`, first occurrence wins, in
//! adapter registration order.
//!
//! When no adapter is registered or all of them fail the result is empty.
//! Substituting fallback content is the caller's decision.

use crate::adapter::SourceAdapter;
use crate::cache::{TtlCache, source_key};
use crate::error::SourceError;
use crate::events::{EventSink, FeedEvent, TracingSink};
use crate::limiter::RateLimiter;
use crate::models::{Article, SourceMetrics};
use crate::monitor::HealthMonitor;
use futures::FutureExt;
use futures::future::join_all;
use itertools::Itertools;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{info, instrument, warn};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    cache: Arc<TtlCache<Vec<Article>>>,
    limiter: Arc<RateLimiter>,
    monitor: Arc<HealthMonitor>,
    events: Arc<dyn EventSink>,
    cache_ttl: Duration,
    adapter_timeout: Duration,
    next_run: AtomicU64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sources", &self.source_names())
            .field("cache_ttl", &self.cache_ttl)
            .field("adapter_timeout", &self.adapter_timeout)
            .finish()
    }
}

/// Collaborators default to fresh, private instances when not injected.
pub struct OrchestratorBuilder {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    cache: Option<Arc<TtlCache<Vec<Article>>>>,
    limiter: Option<Arc<RateLimiter>>,
    monitor: Option<Arc<HealthMonitor>>,
    events: Option<Arc<dyn EventSink>>,
    cache_ttl: Duration,
    adapter_timeout: Duration,
}

impl OrchestratorBuilder {
    pub fn adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = Arc<dyn SourceAdapter>>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    pub fn cache(mut self, cache: Arc<TtlCache<Vec<Article>>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Limiter for whole adapter runs, keyed by each adapter's `domain()`.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn adapter_timeout(mut self, limit: Duration) -> Self {
        self.adapter_timeout = limit;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            adapters: self.adapters,
            cache: self.cache.unwrap_or_default(),
            limiter: self.limiter.unwrap_or_default(),
            monitor: self.monitor.unwrap_or_default(),
            events: self.events.unwrap_or_else(|| Arc::new(TracingSink)),
            cache_ttl: self.cache_ttl,
            adapter_timeout: self.adapter_timeout,
            next_run: AtomicU64::new(1),
        }
    }
}

/// What happened once a run got its domain slot.
enum Run {
    Cached(Vec<Article>),
    /// Adapter result, already contract-checked, and its duration.
    Finished(Result<Vec<Article>, SourceError>, Duration),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn check_contract(name: &str, articles: &[Article]) -> Result<(), SourceError> {
    match articles.iter().find(|a| a.source != name) {
        Some(stray) => Err(SourceError::Contract(format!(
            "article {} tagged with source {:?}, expected {:?}",
            stray.url, stray.source, name
        ))),
        None => Ok(()),
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder {
            adapters: Vec::new(),
            cache: None,
            limiter: None,
            monitor: None,
            events: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Merged, url-deduplicated articles from every adapter.
    #[instrument(level = "info", skip(self), fields(sources = self.adapters.len()))]
    pub async fn get_all_articles(&self) -> Vec<Article> {
        if self.adapters.is_empty() {
            warn!("no sources enabled");
            return Vec::new();
        }

        let outcomes = join_all(self.adapters.iter().map(|a| self.run_adapter(a.as_ref()))).await;

        let mut failed = 0usize;
        let merged: Vec<Article> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(articles) => Some(articles),
                Err(_) => {
                    failed += 1;
                    None
                }
            })
            .flatten()
            .unique_by(|a| a.url.clone())
            .collect();

        info!(
            articles = merged.len(),
            failed,
            "Merged articles from all sources"
        );
        merged
    }

    /// Articles from one source, through the same cache/limit/monitor pipeline.
    pub async fn get_source_articles(&self, name: &str) -> Result<Vec<Article>, SourceError> {
        match self.adapters.iter().find(|a| a.name() == name) {
            Some(adapter) => self.run_adapter(adapter.as_ref()).await,
            None => Err(SourceError::Adapter(format!("unknown source {:?}", name))),
        }
    }

    /// Drop the cached result of `name` so the next call refetches.
    pub async fn invalidate(&self, name: &str) {
        self.cache.delete(&source_key(name)).await;
    }

    pub async fn metrics(&self) -> Vec<SourceMetrics> {
        self.monitor.get_all_metrics().await
    }

    async fn run_adapter(&self, adapter: &dyn SourceAdapter) -> Result<Vec<Article>, SourceError> {
        let name = adapter.name();
        let key = source_key(name);

        if let Some(articles) = self.cache.get(&key).await {
            self.events.emit(FeedEvent::CacheHit {
                source: name.to_string(),
                articles: articles.len(),
            });
            return Ok(articles);
        }
        self.events.emit(FeedEvent::CacheMiss {
            source: name.to_string(),
        });

        let task_id = format!("run-{}", self.next_run.fetch_add(1, Ordering::Relaxed));
        let scheduled_run = async {
            // A caller queued behind a run of the same source finds its result here.
            if let Some(articles) = self.cache.get(&key).await {
                return Run::Cached(articles);
            }
            self.events.emit(FeedEvent::FetchStarted {
                source: name.to_string(),
            });
            let t0 = Instant::now();
            let result = match AssertUnwindSafe(adapter.produce_articles())
                .catch_unwind()
                .await
            {
                Err(panic) => Err(SourceError::Panicked(panic_message(panic.as_ref()))),
                Ok(result) => result
                    .and_then(|articles| check_contract(name, &articles).map(|()| articles)),
            };
            let elapsed = t0.elapsed();
            if let Ok(articles) = &result {
                self.cache
                    .set(key.clone(), articles.clone(), self.cache_ttl)
                    .await;
            }
            Run::Finished(result, elapsed)
        };

        let outcome = match timeout(
            self.adapter_timeout,
            self.limiter.schedule(adapter.domain(), &task_id, scheduled_run),
        )
        .await
        {
            Err(_) => Err(SourceError::Timeout {
                secs: self.adapter_timeout.as_secs(),
            }),
            Ok(Err(limited)) => Err(limited.into()),
            Ok(Ok(Run::Cached(articles))) => {
                self.events.emit(FeedEvent::CacheHit {
                    source: name.to_string(),
                    articles: articles.len(),
                });
                return Ok(articles);
            }
            Ok(Ok(Run::Finished(result, elapsed))) => result.map(|articles| (articles, elapsed)),
        };

        match outcome {
            Ok((articles, elapsed)) => {
                self.monitor
                    .record_success(name, elapsed, articles.len())
                    .await;
                self.events.emit(FeedEvent::FetchSucceeded {
                    source: name.to_string(),
                    articles: articles.len(),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                Ok(articles)
            }
            Err(e) => {
                warn!(source = %name, kind = e.kind(), error = %e, "Source failed");
                self.monitor.record_error(name, &e).await;
                self.events.emit(FeedEvent::FetchFailed {
                    source: name.to_string(),
                    kind: e.kind(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::limiter::RateLimiterConfig;
    use crate::models::HealthStatus;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    enum Behavior {
        Articles(Vec<Article>),
        Fail,
        Panic,
        Sleep(Duration),
        FailThenSucceed,
    }

    struct Stub {
        name: String,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl Stub {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        fn domain(&self) -> &str {
            &self.name
        }

        async fn produce_articles(&self) -> Result<Vec<Article>, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Articles(a) => Ok(a.clone()),
                Behavior::Fail => Err(SourceError::Adapter("boom".into())),
                Behavior::Panic => panic!("adapter exploded"),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(articles(&self.name, &["slow"]))
                }
                Behavior::FailThenSucceed if n == 0 => Err(SourceError::Adapter("first".into())),
                Behavior::FailThenSucceed => Ok(articles(&self.name, &["second"])),
            }
        }
    }

    fn articles(source: &str, slugs: &[&str]) -> Vec<Article> {
        slugs
            .iter()
            .map(|s| Article::new(*s, format!("https://n.example/{}", s), source, None, None))
            .collect()
    }

    fn orchestrator(adapters: Vec<Arc<Stub>>) -> Orchestrator {
        Orchestrator::builder()
            .adapters(adapters.into_iter().map(|a| a as Arc<dyn SourceAdapter>))
            .build()
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_sources() {
        let a = Stub::new("a", Behavior::Articles(articles("a", &["a1", "a2"])));
        let b = Stub::new("b", Behavior::Fail);
        let c = Stub::new("c", Behavior::Articles(articles("c", &["c1", "c2", "c3"])));
        let orch = orchestrator(vec![a, b, c]);

        let out = orch.get_all_articles().await;
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|x| x.source != "b"));

        let b_metrics = orch.monitor().get_metrics("b").await.unwrap();
        assert_eq!(b_metrics.status(), HealthStatus::Error);
        assert_eq!(b_metrics.error_count, 1);
        assert_eq!(
            orch.monitor().get_metrics("a").await.unwrap().success_count,
            1
        );
    }

    #[tokio::test]
    async fn test_dedup_first_seen_wins() {
        let a = Stub::new("a", Behavior::Articles(articles("a", &["x", "y"])));
        let b = Stub::new("b", Behavior::Articles(articles("b", &["y", "z"])));
        let orch = orchestrator(vec![a, b]);

        let out = orch.get_all_articles().await;
        let urls: Vec<_> = out.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(
            urls,
            ["https://n.example/x", "https://n.example/y", "https://n.example/z"]
        );
        assert_eq!(out[1].source, "a");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_adapter() {
        let cache = Arc::new(TtlCache::new());
        cache
            .set(source_key("b"), articles("b", &["b1", "b2", "b3"]), Duration::from_secs(60))
            .await;
        let a = Stub::new("a", Behavior::Articles(articles("a", &["a1", "a2", "a3", "a4", "a5"])));
        let b = Stub::new("b", Behavior::Articles(Vec::new()));
        let orch = Orchestrator::builder()
            .adapter(a.clone())
            .adapter(b.clone())
            .cache(cache.clone())
            .build();

        let out = orch.get_all_articles().await;
        assert_eq!(out.len(), 8);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
        assert_eq!(cache.get(&source_key("a")).await.map(|v| v.len()), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycles_share_one_run() {
        let a = Stub::new("a", Behavior::Sleep(Duration::from_millis(500)));
        let orch = orchestrator(vec![a.clone()]);

        let (first, second) = tokio::join!(orch.get_all_articles(), orch.get_all_articles());
        assert_eq!(a.calls(), 1);
        assert_eq!(first.len(), 1);
        assert_eq!(second, first);

        let m = orch.monitor().get_metrics("a").await.unwrap();
        assert_eq!(m.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_not_cached() {
        let a = Stub::new("a", Behavior::FailThenSucceed);
        let orch = orchestrator(vec![a.clone()]);

        assert!(orch.get_all_articles().await.is_empty());
        let out = orch.get_all_articles().await;
        assert_eq!(out.len(), 1);
        assert_eq!(a.calls(), 2);

        orch.get_all_articles().await;
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry_and_invalidate_trigger_refetch() {
        let a = Stub::new("a", Behavior::Articles(articles("a", &["a1"])));
        let orch = Orchestrator::builder()
            .adapter(a.clone())
            .cache_ttl(Duration::from_secs(60))
            .build();

        orch.get_all_articles().await;
        orch.get_all_articles().await;
        assert_eq!(a.calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        orch.get_all_articles().await;
        assert_eq!(a.calls(), 2);

        orch.invalidate("a").await;
        orch.get_all_articles().await;
        assert_eq!(a.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_adapter_times_out_alone() {
        let fast = Stub::new("fast", Behavior::Articles(articles("fast", &["f1"])));
        let slow = Stub::new("slow", Behavior::Sleep(Duration::from_secs(120)));
        let orch = Orchestrator::builder()
            .adapter(slow)
            .adapter(fast)
            .adapter_timeout(Duration::from_secs(30))
            .build();

        let started = Instant::now();
        let out = orch.get_all_articles().await;
        assert!(started.elapsed() <= Duration::from_secs(31));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, "fast");

        let m = orch.monitor().get_metrics("slow").await.unwrap();
        assert_eq!(m.last_error_kind.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_isolated() {
        let boom = Stub::new("boom", Behavior::Panic);
        let ok = Stub::new("ok", Behavior::Articles(articles("ok", &["o1"])));
        let orch = orchestrator(vec![boom, ok]);

        let out = orch.get_all_articles().await;
        assert_eq!(out.len(), 1);
        let m = orch.monitor().get_metrics("boom").await.unwrap();
        assert_eq!(m.last_error_kind.as_deref(), Some("panicked"));
        assert!(m.last_error.unwrap().contains("adapter exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mis_tagged_articles_break_contract() {
        let liar = Stub::new("liar", Behavior::Articles(articles("someone-else", &["l1"])));
        let orch = orchestrator(vec![liar]);

        assert!(orch.get_all_articles().await.is_empty());
        let m = orch.monitor().get_metrics("liar").await.unwrap();
        assert_eq!(m.last_error_kind.as_deref(), Some("contract"));
        assert!(orch.get_source_articles("liar").await.is_err());
    }

    #[tokio::test]
    async fn test_rate_limited_run_is_recorded() {
        let config = RateLimiterConfig {
            max_queued: 0,
            ..RateLimiterConfig::default()
        };
        let a = Stub::new("a", Behavior::Articles(articles("a", &["a1"])));
        let orch = Orchestrator::builder()
            .adapter(a.clone())
            .limiter(Arc::new(RateLimiter::new(config)))
            .build();

        let err = orch.get_source_articles("a").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(a.calls(), 0);
        let m = orch.monitor().get_metrics("a").await.unwrap();
        assert_eq!(m.rate_limited_count, 1);
    }

    #[tokio::test]
    async fn test_no_sources_yields_empty_feed() {
        let orch = orchestrator(Vec::new());
        assert!(orch.get_all_articles().await.is_empty());
        assert!(orch.metrics().await.is_empty());
        assert!(orch.get_source_articles("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_events_follow_pipeline() {
        let sink = Arc::new(MemorySink::new());
        let a = Stub::new("a", Behavior::Articles(articles("a", &["a1"])));
        let orch = Orchestrator::builder()
            .adapter(a)
            .events(sink.clone())
            .build();

        orch.get_all_articles().await;
        orch.get_all_articles().await;
        assert_eq!(
            sink.kinds(),
            [
                "cache.miss",
                "fetch.started",
                "fetch.succeeded",
                "cache.hit"
            ]
        );
    }
}
