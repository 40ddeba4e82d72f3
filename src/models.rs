//! Data models shared by every layer of the feed.
//!
//! - [`Article`]: one listing produced by a source adapter
//! - [`SourceMetrics`]: per-source health record kept by the monitor
//! - [`HealthStatus`]: point-in-time classification of a source's last run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Region assigned when a source cannot detect one from content.
pub const DEFAULT_REGION: &str = "Global";

/// A single article listing as produced by a source adapter.
///
/// `url` is the identity key inside a feed; the orchestrator de-duplicates
/// on it. Articles are never mutated once an adapter has produced them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Article {
    /// Headline text.
    pub title: String,
    /// Absolute URL of the article.
    pub url: String,
    /// Name of the adapter that produced this article.
    #[serde(default)]
    pub source: String,
    /// Publication timestamp, when the source exposes one.
    #[serde(default)]
    pub published_date: Option<DateTime<Utc>>,
    /// Region label, [`DEFAULT_REGION`] when undetectable.
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Article {
    /// Build an article, falling back to [`DEFAULT_REGION`] when `region` is
    /// missing or blank.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
        published_date: Option<DateTime<Utc>>,
        region: Option<String>,
    ) -> Self {
        let region = region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(default_region);
        Self {
            title: title.into(),
            url: url.into(),
            source: source.into(),
            published_date,
            region,
        }
    }

    /// Host part of the article URL, e.g. `"lite.cnn.com"`.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// Health classification of a source's most recent invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Error,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Running health record for one source.
///
/// Only the health monitor mutates these, once per adapter invocation.
/// `status` is derived from the last invocation and has no setter.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceMetrics {
    pub name: String,
    pub success_count: u64,
    pub error_count: u64,
    /// Of `error_count`, how many were rate-limiter drops.
    pub rate_limited_count: u64,
    /// Duration of the last successful run in milliseconds.
    pub last_run_time_ms: u64,
    /// Running mean over successful runs only.
    pub average_run_time_ms: f64,
    pub total_articles: u64,
    pub last_run_date: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<String>,
    pub(crate) status: HealthStatus,
}

impl SourceMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success_count: 0,
            error_count: 0,
            rate_limited_count: 0,
            last_run_time_ms: 0,
            average_run_time_ms: 0.0,
            total_articles: 0,
            last_run_date: None,
            last_error: None,
            last_error_kind: None,
            status: HealthStatus::Healthy,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }
}
