//! Gated HTTP GETs for source adapters.
//!
//! [`PageFetcher::fetch_text`] is the one door adapters use to reach the
//! network. For every URL it:
//!
//! 1. runs both compliance checks; a denial yields `Ok(None)`
//! 2. schedules the request on the per-host [`RateLimiter`]
//! 3. issues a GET with the configured user agent and timeout
//! 4. retries transient failures (5xx, 429, transport) with exponential
//!    backoff plus jitter
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::compliance::ComplianceGate;
use crate::error::FetchError;
use crate::limiter::RateLimiter;
use rand::{Rng, rng};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, instrument, warn};
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Exponential backoff settings for transient request failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap to prevent excessive waiting.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if !e.is_transient() || attempt > self.max_retries {
                        if attempt > 1 {
                            error!(
                                attempt,
                                max = self.max_retries,
                                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                                error = %e,
                                "request exhausted retries"
                            );
                        }
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "request attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Build the shared HTTP client with our declared identity.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| FetchError::Internal(e.to_string()))
}

pub struct PageFetcher {
    client: reqwest::Client,
    gate: Arc<ComplianceGate>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    next_task: AtomicU64,
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("retry", &self.retry)
            .finish()
    }
}

impl PageFetcher {
    pub fn new(
        client: reqwest::Client,
        gate: Arc<ComplianceGate>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            gate,
            limiter,
            retry,
            next_task: AtomicU64::new(1),
        }
    }

    pub fn gate(&self) -> &ComplianceGate {
        &self.gate
    }

    /// Body of `url`, or `None` if compliance denied the fetch.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_text(&self, url: &str) -> Result<Option<String>, FetchError> {
        if !self.gate.check(url).await {
            debug!(%url, "fetch skipped by compliance gate");
            return Ok(None);
        }

        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| FetchError::Internal(format!("no host in {}", url)))?;

        let body = self
            .retry
            .run(|| async {
                let task_id = format!("req-{}", self.next_task.fetch_add(1, Ordering::Relaxed));
                self.limiter
                    .schedule(&host, &task_id, self.get_once(url))
                    .await
                    .and_then(|inner| inner)
            })
            .await?;
        Ok(Some(body))
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{Denylist, RobotsResponse, RobotsSource};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct NoRobots;

    #[async_trait]
    impl RobotsSource for NoRobots {
        async fn fetch(&self, _url: &Url) -> Result<RobotsResponse, FetchError> {
            Ok(RobotsResponse::Missing)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default();
        let out = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(FetchError::Status(503))
                } else {
                    Ok("body")
                }
            })
            .await;
        assert_eq!(out, Ok("body"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_on_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let out: Result<(), _> = RetryPolicy::default()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Status(404))
            })
            .await;
        assert_eq!(out, Err(FetchError::Status(404)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let calls = AtomicUsize::new(0);
        let out: Result<(), _> = RetryPolicy::default()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Timeout)
            })
            .await;
        assert_eq!(out, Err(FetchError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        };
        assert!(policy.delay_for(1) < Duration::from_millis(1251));
        assert!(policy.delay_for(2) >= Duration::from_secs(2));
        assert!(policy.delay_for(8) <= Duration::from_millis(4250));
    }

    #[tokio::test]
    async fn test_denied_url_is_not_fetched() {
        let denylist = Denylist::new(["blocked.example"], Vec::<String>::new()).unwrap();
        let gate = Arc::new(ComplianceGate::new("NewsFanout/0.1", denylist, Arc::new(NoRobots)));
        let client = build_client("NewsFanout/0.1", DEFAULT_REQUEST_TIMEOUT).unwrap();
        let fetcher = PageFetcher::new(
            client,
            gate,
            Arc::new(RateLimiter::default()),
            RetryPolicy::none(),
        );

        let out = fetcher.fetch_text("https://blocked.example/news").await;
        assert_eq!(out, Ok(None));
    }
}
