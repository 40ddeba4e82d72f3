//! Per-domain request scheduler.
//!
//! Each domain gets its own limiter, created lazily on first use:
//!
//! - at most one task in flight per domain
//! - consecutive task starts spaced by `60_000 / rpm` milliseconds
//! - a reservoir of `rpm` tokens refilled every 60 seconds
//! - at most `max_queued` tasks waiting; extra tasks are rejected with
//!   [`FetchError::RateLimited`] instead of silently vanishing
//!
//! The task's own output is returned untouched. If the caller drops the
//! scheduled future (for example on an adapter timeout), its queue slot or
//! in-flight slot is released immediately.

use crate::error::FetchError;
use crate::events::{EventSink, FeedEvent, TracingSink};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, instrument};

/// Length of one reservoir window.
pub const REFILL_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;
pub const DEFAULT_MAX_QUEUED: usize = 50;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub default_rpm: u32,
    pub max_queued: usize,
    /// Per-domain overrides of `default_rpm`.
    pub domain_rpm: HashMap<String, u32>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_rpm: DEFAULT_REQUESTS_PER_MINUTE,
            max_queued: DEFAULT_MAX_QUEUED,
            domain_rpm: HashMap::new(),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_domain_rpm(mut self, domain: &str, rpm: u32) -> Self {
        self.domain_rpm.insert(normalize_domain(domain), rpm);
        self
    }

    fn rpm_for(&self, domain: &str) -> u32 {
        self.domain_rpm
            .get(domain)
            .copied()
            .unwrap_or(self.default_rpm)
            .max(1)
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug)]
struct DomainState {
    tokens_remaining: u32,
    window_start: Instant,
    last_start: Option<Instant>,
}

#[derive(Debug)]
struct DomainLimiter {
    rpm: u32,
    min_interval: Duration,
    queued: AtomicUsize,
    /// Held for the whole duration of a task, which is what keeps
    /// `in_flight <= 1`. tokio's mutex is FIFO, so waiters start in order.
    state: tokio::sync::Mutex<DomainState>,
}

impl DomainLimiter {
    fn new(rpm: u32) -> Self {
        Self {
            rpm,
            min_interval: Duration::from_millis(60_000 / u64::from(rpm)),
            queued: AtomicUsize::new(0),
            state: tokio::sync::Mutex::new(DomainState {
                tokens_remaining: rpm,
                window_start: Instant::now(),
                last_start: None,
            }),
        }
    }
}

/// Decrements the waiting count when a queued task gets its turn or is dropped.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    domains: Mutex<HashMap<String, Arc<DomainLimiter>>>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_events(config, Arc::new(TracingSink))
    }

    pub fn with_events(config: RateLimiterConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn limiter_for(&self, domain: &str) -> Arc<DomainLimiter> {
        let mut domains = self
            .domains
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainLimiter::new(self.config.rpm_for(domain))))
            .clone()
    }

    /// Configured requests per minute for `domain`.
    pub fn rpm(&self, domain: &str) -> u32 {
        self.config.rpm_for(&normalize_domain(domain))
    }

    /// Number of tasks currently waiting for `domain` (not counting the one in flight).
    pub fn queued(&self, domain: &str) -> usize {
        let domains = self
            .domains
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        domains
            .get(&normalize_domain(domain))
            .map(|l| l.queued.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Run `task` once `domain` has a free slot.
    ///
    /// Returns `Err(FetchError::RateLimited)` without ever polling `task`
    /// when the domain queue is full. Otherwise returns the task's output.
    #[instrument(level = "debug", skip(self, task))]
    pub async fn schedule<F>(
        &self,
        domain: &str,
        task_id: &str,
        task: F,
    ) -> Result<F::Output, FetchError>
    where
        F: Future,
    {
        let domain = normalize_domain(domain);
        let limiter = self.limiter_for(&domain);

        let waiting = limiter.queued.fetch_add(1, Ordering::SeqCst);
        let slot = QueueSlot(&limiter.queued);
        if waiting >= self.config.max_queued {
            drop(slot);
            self.events.emit(FeedEvent::RateLimitDropped {
                domain: domain.clone(),
                task_id: task_id.to_string(),
            });
            return Err(FetchError::RateLimited { domain });
        }

        let enqueued_at = Instant::now();
        let mut state = limiter.state.lock().await;
        drop(slot);

        loop {
            let now = Instant::now();
            if now.duration_since(state.window_start) >= REFILL_WINDOW {
                state.tokens_remaining = limiter.rpm;
                state.window_start = now;
            }
            if state.tokens_remaining > 0 {
                break;
            }
            debug!(%domain, "reservoir empty; waiting for refill");
            sleep_until(state.window_start + REFILL_WINDOW).await;
        }

        if let Some(last) = state.last_start {
            let ready_at = last + limiter.min_interval;
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }

        let started = Instant::now();
        state.tokens_remaining -= 1;
        state.last_start = Some(started);

        let waited = started.duration_since(enqueued_at);
        if !waited.is_zero() {
            self.events.emit(FeedEvent::RateLimitDelayed {
                domain: domain.clone(),
                task_id: task_id.to_string(),
                waited_ms: waited.as_millis() as u64,
            });
        }

        let output = task.await;
        drop(state);
        Ok(output)
    }
}
