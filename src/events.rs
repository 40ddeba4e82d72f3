//! Structured event emission for the observability surface.
//!
//! The core never writes dashboard-facing logs itself. Components emit typed
//! [`FeedEvent`]s into an injected [`EventSink`]; the binary plugs in
//! [`TracingSink`], tests plug in [`MemorySink`].
//!
//! # Events
//!
//! | Event Kind | Description |
//! |------------|-------------|
//! | `fetch.started` | Adapter invocation began (cache miss) |
//! | `fetch.succeeded` | Adapter produced articles |
//! | `fetch.failed` | Adapter invocation failed |
//! | `cache.hit` | Source served from cache, no network |
//! | `cache.miss` | Source not cached or expired |
//! | `ratelimit.delayed` | Task waited for its domain slot |
//! | `ratelimit.dropped` | Task rejected, domain queue full |
//! | `compliance.allowed` | Robots rules allow the URL |
//! | `compliance.denied` | Policy or robots rules deny the URL |
//! | `compliance.fail_open` | Robots fetch failed, allowing |
//! | `compliance.fail_closed` | Evaluation broke, denying |

use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    FetchStarted {
        source: String,
    },
    FetchSucceeded {
        source: String,
        articles: usize,
        elapsed_ms: u64,
    },
    FetchFailed {
        source: String,
        kind: &'static str,
        error: String,
    },
    CacheHit {
        source: String,
        articles: usize,
    },
    CacheMiss {
        source: String,
    },
    RateLimitDelayed {
        domain: String,
        task_id: String,
        waited_ms: u64,
    },
    RateLimitDropped {
        domain: String,
        task_id: String,
    },
    ComplianceAllowed {
        url: String,
    },
    ComplianceDenied {
        url: String,
        reason: String,
    },
    ComplianceFailOpen {
        domain: String,
        error: String,
    },
    ComplianceFailClosed {
        url: String,
        error: String,
    },
}

impl FeedEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::FetchStarted { .. } => "fetch.started",
            FeedEvent::FetchSucceeded { .. } => "fetch.succeeded",
            FeedEvent::FetchFailed { .. } => "fetch.failed",
            FeedEvent::CacheHit { .. } => "cache.hit",
            FeedEvent::CacheMiss { .. } => "cache.miss",
            FeedEvent::RateLimitDelayed { .. } => "ratelimit.delayed",
            FeedEvent::RateLimitDropped { .. } => "ratelimit.dropped",
            FeedEvent::ComplianceAllowed { .. } => "compliance.allowed",
            FeedEvent::ComplianceDenied { .. } => "compliance.denied",
            FeedEvent::ComplianceFailOpen { .. } => "compliance.fail_open",
            FeedEvent::ComplianceFailClosed { .. } => "compliance.fail_closed",
        }
    }
}

/// Consumer of [`FeedEvent`]s. Must not block: it is called between
/// suspension points on the hot path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FeedEvent);
}

/// Renders every event as a `tracing` event with an `event_kind` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: FeedEvent) {
        let event_kind = event.kind();
        match event {
            FeedEvent::FetchStarted { source } => {
                info!(event_kind, %source, "Fetching source")
            }
            FeedEvent::FetchSucceeded {
                source,
                articles,
                elapsed_ms,
            } => info!(event_kind, %source, articles, elapsed_ms, "Fetched source"),
            FeedEvent::FetchFailed {
                source,
                kind,
                error,
            } => warn!(event_kind, %source, kind, %error, "Source fetch failed"),
            FeedEvent::CacheHit { source, articles } => {
                info!(event_kind, %source, articles, "Serving source from cache")
            }
            FeedEvent::CacheMiss { source } => info!(event_kind, %source, "Cache miss"),
            FeedEvent::RateLimitDelayed {
                domain,
                task_id,
                waited_ms,
            } => info!(event_kind, %domain, %task_id, waited_ms, "Rate limiter delayed task"),
            FeedEvent::RateLimitDropped { domain, task_id } => {
                warn!(event_kind, %domain, %task_id, "Rate limiter queue full; task dropped")
            }
            FeedEvent::ComplianceAllowed { url } => info!(event_kind, %url, "Crawl allowed"),
            FeedEvent::ComplianceDenied { url, reason } => {
                info!(event_kind, %url, %reason, "Crawl denied")
            }
            FeedEvent::ComplianceFailOpen { domain, error } => {
                warn!(event_kind, %domain, %error, "robots.txt unavailable; allowing")
            }
            FeedEvent::ComplianceFailClosed { url, error } => {
                warn!(event_kind, %url, %error, "Compliance check failed; denying")
            }
        }
    }
}

/// Keeps every emitted event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<FeedEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FeedEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(FeedEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: FeedEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.emit(FeedEvent::CacheMiss {
            source: "a".into(),
        });
        sink.emit(FeedEvent::FetchStarted {
            source: "a".into(),
        });
        assert_eq!(sink.kinds(), vec!["cache.miss", "fetch.started"]);
        assert_eq!(sink.count("cache.miss"), 1);
        assert_eq!(sink.count("cache.hit"), 0);
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let sink = TracingSink;
        sink.emit(FeedEvent::RateLimitDropped {
            domain: "example.com".into(),
            task_id: "t1".into(),
        });
        sink.emit(FeedEvent::ComplianceFailOpen {
            domain: "example.com".into(),
            error: "transport error".into(),
        });
    }
}
