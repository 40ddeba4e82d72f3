//! Per-source health tracking.
//!
//! The monitor only observes: it never blocks or reorders calls, and a source
//! stuck in `error` is still invoked on the next orchestration cycle.
//!
//! Status is a classification of the *last* invocation:
//! - any error → `error`
//! - a success slower than [`SLOW_FACTOR`]× the prior average, once at least
//!   [`WARMUP_SUCCESSES`] prior successes exist → `warning`
//! - otherwise → `healthy`

use crate::error::SourceError;
use crate::models::{HealthStatus, SourceMetrics};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

pub const SLOW_FACTOR: f64 = 2.0;
pub const WARMUP_SUCCESSES: u64 = 5;

#[derive(Debug, Default)]
pub struct HealthMonitor {
    metrics: RwLock<HashMap<String, SourceMetrics>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, name: &str, duration: Duration, item_count: usize) {
        let duration_ms = duration.as_millis() as u64;
        let mut all = self.metrics.write().await;
        let m = all
            .entry(name.to_string())
            .or_insert_with(|| SourceMetrics::new(name));

        let prior = m.success_count;
        let prior_avg = m.average_run_time_ms;
        let slow = prior >= WARMUP_SUCCESSES && duration_ms as f64 > prior_avg * SLOW_FACTOR;

        m.average_run_time_ms = (prior_avg * prior as f64 + duration_ms as f64) / (prior + 1) as f64;
        m.success_count += 1;
        m.last_run_time_ms = duration_ms;
        m.total_articles += item_count as u64;
        m.last_run_date = Some(Utc::now());
        m.status = if slow {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        debug!(source = %name, duration_ms, avg_ms = m.average_run_time_ms, status = %m.status, "recorded success");
    }

    pub async fn record_error(&self, name: &str, error: &SourceError) {
        let mut all = self.metrics.write().await;
        let m = all
            .entry(name.to_string())
            .or_insert_with(|| SourceMetrics::new(name));

        m.error_count += 1;
        if error.is_rate_limited() {
            m.rate_limited_count += 1;
        }
        m.last_error = Some(error.to_string());
        m.last_error_kind = Some(error.kind().to_string());
        m.last_run_date = Some(Utc::now());
        m.status = HealthStatus::Error;
        debug!(source = %name, error = %error, "recorded error");
    }

    pub async fn get_metrics(&self, name: &str) -> Option<SourceMetrics> {
        self.metrics.read().await.get(name).cloned()
    }

    /// Every tracked source, sorted by name.
    pub async fn get_all_metrics(&self) -> Vec<SourceMetrics> {
        let mut all: Vec<SourceMetrics> = self.metrics.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
