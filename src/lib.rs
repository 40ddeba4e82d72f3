//! # news_fanout
//!
//! Fetch orchestration core for a news feed assembled from several
//! independent, uncooperative sources.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`cache`] | TTL key/value store memoizing each source's result |
//! | [`limiter`] | per-domain scheduler: serialized, spaced, bounded queue |
//! | [`compliance`] | denylist policy plus robots.txt verdicts |
//! | [`monitor`] | per-source success/error/latency health |
//! | [`adapter`] | the capability every source implements |
//! | [`orchestrator`] | concurrent fan-out, all-settle merge, url dedup |
//! | [`feed`] | sorting, filtering and pagination for callers |
//!
//! ## Data flow
//!
//! ```text
//! FeedService ─> Orchestrator ─┬─> cache ─> run limiter ─> adapter ─> PageFetcher ─> source
//!                              ├─> ...                        (compliance + request limiter)
//!                              └─> health monitor observes every run
//! ```
//!
//! Shared state (cache, limiter maps, metrics) lives in explicitly
//! constructed components handed to the [`Orchestrator`], so tests run with
//! isolated instances.

pub mod adapter;
pub mod cache;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod fetch;
pub mod limiter;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod robots;
pub mod sources;

pub use adapter::SourceAdapter;
pub use cache::TtlCache;
pub use compliance::ComplianceGate;
pub use error::{ConfigError, FetchError, SourceError};
pub use feed::{FeedPage, FeedQuery, FeedService};
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use models::{Article, HealthStatus, SourceMetrics};
pub use monitor::HealthMonitor;
pub use orchestrator::Orchestrator;
