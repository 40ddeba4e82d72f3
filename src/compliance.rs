//! Decides whether a URL may be fetched at all.
//!
//! Two checks, both required before any adapter request:
//!
//! 1. [`ComplianceGate::is_allowed_by_policy`]: synchronous static denylist
//!    (domains and URL patterns) plus a scheme check.
//! 2. [`ComplianceGate::can_crawl`]: robots.txt rules for our agent, fetched
//!    per domain and cached for [`DECISION_TTL`].
//!
//! Failure handling is asymmetric:
//! - robots.txt could not be fetched (network error, 5xx, timeout): **allow**
//! - anything else going wrong while evaluating: **deny**
//!
//! When a cached ruleset expires and the refetch fails, the old rules stay in
//! force. Loopback hosts are always allowed.

use crate::error::FetchError;
use crate::events::{EventSink, FeedEvent, TracingSink};
use crate::robots::{MAX_ROBOTS_BYTES, RobotsError, RobotsRules};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::{Host, Url};

/// How long a fetched robots.txt verdict stays valid.
pub const DECISION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Retry window after a failed robots.txt fetch.
pub const FAIL_OPEN_TTL: Duration = Duration::from_secs(10 * 60);

/// Body of a robots.txt request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsResponse {
    Found(String),
    /// The site publishes no robots.txt (4xx): no restrictions.
    Missing,
}

/// Where robots.txt documents come from.
#[async_trait]
pub trait RobotsSource: Send + Sync {
    async fn fetch(&self, robots_url: &Url) -> Result<RobotsResponse, FetchError>;
}

/// Fetches robots.txt over HTTP with the crawler's user agent.
///
/// Bodies above [`MAX_ROBOTS_BYTES`] are rejected with
/// [`FetchError::Internal`] while streaming, which the gate treats as
/// fail-closed.
#[derive(Debug, Clone)]
pub struct HttpRobotsSource {
    client: reqwest::Client,
}

impl HttpRobotsSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RobotsSource for HttpRobotsSource {
    async fn fetch(&self, robots_url: &Url) -> Result<RobotsResponse, FetchError> {
        let mut resp = self.client.get(robots_url.clone()).send().await?;
        let status = resp.status();
        if status.is_success() {
            let too_large = |n: usize| FetchError::Internal(RobotsError::TooLarge(n).to_string());
            if let Some(len) = resp.content_length().filter(|&n| n > MAX_ROBOTS_BYTES as u64) {
                return Err(too_large(len as usize));
            }
            let mut body = Vec::new();
            while let Some(chunk) = resp.chunk().await? {
                body.extend_from_slice(&chunk);
                if body.len() > MAX_ROBOTS_BYTES {
                    return Err(too_large(body.len()));
                }
            }
            Ok(RobotsResponse::Found(String::from_utf8_lossy(&body).into_owned()))
        } else if status.is_client_error() {
            Ok(RobotsResponse::Missing)
        } else {
            Err(FetchError::Status(status.as_u16()))
        }
    }
}

/// Static list of domains and URL patterns that are never fetched.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    domains: Vec<String>,
    patterns: Vec<Regex>,
}

impl Denylist {
    pub fn new<D, P>(domains: D, patterns: P) -> Result<Self, regex::Error>
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { domains, patterns })
    }

    pub fn denies(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let domain_hit = self
            .domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)));
        domain_hit || self.patterns.iter().any(|re| re.is_match(url.as_str()))
    }
}

/// Cached robots verdict for one domain.
#[derive(Debug, Clone)]
pub struct ComplianceDecision {
    pub domain: String,
    pub ruleset: Arc<RobotsRules>,
    pub decided_at: Instant,
    pub ttl: Duration,
    /// True when the rules could not be fetched and allow-all was assumed.
    pub fail_open: bool,
}

impl ComplianceDecision {
    fn is_fresh(&self) -> bool {
        self.decided_at.elapsed() < self.ttl
    }
}

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Robots(#[from] RobotsError),

    #[error("robots source failed: {0}")]
    Source(FetchError),
}

pub struct ComplianceGate {
    user_agent: String,
    denylist: Denylist,
    source: Arc<dyn RobotsSource>,
    decisions: RwLock<HashMap<String, ComplianceDecision>>,
    /// One robots.txt fetch per domain at a time.
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: Arc<dyn EventSink>,
}

impl ComplianceGate {
    pub fn new(
        user_agent: impl Into<String>,
        denylist: Denylist,
        source: Arc<dyn RobotsSource>,
    ) -> Self {
        Self::with_events(user_agent, denylist, source, Arc::new(TracingSink))
    }

    pub fn with_events(
        user_agent: impl Into<String>,
        denylist: Denylist,
        source: Arc<dyn RobotsSource>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            denylist,
            source,
            decisions: RwLock::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Static policy check: http(s) only, not on the denylist.
    pub fn is_allowed_by_policy(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        matches!(parsed.scheme(), "http" | "https")
            && parsed.host().is_some()
            && !self.denylist.denies(&parsed)
    }

    /// Robots check. Never errors: failures resolve to allow or deny as
    /// described in the module docs.
    #[instrument(level = "debug", skip(self))]
    pub async fn can_crawl(&self, url: &str) -> bool {
        match self.evaluate(url).await {
            Ok(true) => {
                self.events.emit(FeedEvent::ComplianceAllowed {
                    url: url.to_string(),
                });
                true
            }
            Ok(false) => {
                self.events.emit(FeedEvent::ComplianceDenied {
                    url: url.to_string(),
                    reason: "robots".to_string(),
                });
                false
            }
            Err(e) => {
                warn!(%url, error = %e, "compliance evaluation failed");
                self.events.emit(FeedEvent::ComplianceFailClosed {
                    url: url.to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Both checks, policy first so denylisted hosts never see a robots request.
    pub async fn check(&self, url: &str) -> bool {
        if !self.is_allowed_by_policy(url) {
            self.events.emit(FeedEvent::ComplianceDenied {
                url: url.to_string(),
                reason: "policy".to_string(),
            });
            return false;
        }
        self.can_crawl(url).await
    }

    /// Current cached decision for `domain`, fresh or not.
    pub async fn decision(&self, domain: &str) -> Option<ComplianceDecision> {
        self.decisions.read().await.get(domain).cloned()
    }

    async fn evaluate(&self, url: &str) -> Result<bool, ComplianceError> {
        let parsed = Url::parse(url).map_err(|_| ComplianceError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host()
            .ok_or_else(|| ComplianceError::InvalidUrl(url.to_string()))?;
        if is_local(&host) {
            debug!(%url, "local host; skipping robots check");
            return Ok(true);
        }

        let rules = self.rules_for(&parsed).await?;
        let path = match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        };
        Ok(rules.is_allowed(&self.user_agent, &path))
    }

    async fn rules_for(&self, url: &Url) -> Result<Arc<RobotsRules>, ComplianceError> {
        let domain = domain_key(url);
        if let Some(d) = self.decisions.read().await.get(&domain) {
            if d.is_fresh() {
                return Ok(d.ruleset.clone());
            }
        }

        let lock = {
            let mut locks = self.fetch_locks.lock().await;
            locks.entry(domain.clone()).or_default().clone()
        };
        let _fetching = lock.lock().await;

        // Another task may have refreshed it while we waited.
        let previous = self.decisions.read().await.get(&domain).cloned();
        if let Some(d) = &previous {
            if d.is_fresh() {
                return Ok(d.ruleset.clone());
            }
        }

        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        let decision = match self.source.fetch(&robots_url).await {
            Ok(RobotsResponse::Found(body)) => {
                let rules = RobotsRules::parse(&body)?;
                self.fresh_decision(&domain, rules, DECISION_TTL, false)
            }
            Ok(RobotsResponse::Missing) => {
                self.fresh_decision(&domain, RobotsRules::allow_all(), DECISION_TTL, false)
            }
            Err(e) if e.is_transport() => match previous.filter(|d| !d.fail_open) {
                Some(stale) => {
                    warn!(%domain, error = %e, "robots.txt refetch failed; keeping previous rules");
                    ComplianceDecision {
                        decided_at: Instant::now(),
                        ttl: FAIL_OPEN_TTL,
                        ..stale
                    }
                }
                None => {
                    self.events.emit(FeedEvent::ComplianceFailOpen {
                        domain: domain.clone(),
                        error: e.to_string(),
                    });
                    self.fresh_decision(&domain, RobotsRules::allow_all(), FAIL_OPEN_TTL, true)
                }
            },
            Err(e) => return Err(ComplianceError::Source(e)),
        };

        let rules = decision.ruleset.clone();
        self.decisions.write().await.insert(domain, decision);
        Ok(rules)
    }

    fn fresh_decision(
        &self,
        domain: &str,
        rules: RobotsRules,
        ttl: Duration,
        fail_open: bool,
    ) -> ComplianceDecision {
        ComplianceDecision {
            domain: domain.to_string(),
            ruleset: Arc::new(rules),
            decided_at: Instant::now(),
            ttl,
            fail_open,
        }
    }
}

/// `host[:port]`, lowercased. robots.txt is scoped to this.
fn domain_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

fn is_local(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(d) => {
            let d = d.to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        Host::Ipv4(ip) => IpAddr::V4(*ip).is_loopback() || ip.is_unspecified(),
        Host::Ipv6(ip) => IpAddr::V6(*ip).is_loopback(),
    }
}
