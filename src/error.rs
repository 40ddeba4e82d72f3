//! Error taxonomy for the fetch orchestration core.
//!
//! Two layers:
//! - [`FetchError`]: a single scheduled task or HTTP request failed
//! - [`SourceError`]: a whole adapter invocation failed, as seen by the orchestrator
//!
//! Policy denials are not errors at all; the page fetcher reports them as an
//! empty result.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The per-domain queue was full and the task was dropped without running.
    #[error("rate-limited: queue for {domain} is full")]
    RateLimited { domain: String },

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// Network-level failures: the remote could not be reached or answered badly.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout | FetchError::Status(_) | FetchError::Transport(_)
        )
    }

    /// Worth retrying: server errors, throttling responses and transport hiccups.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::Timeout | FetchError::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Failure of one adapter invocation. Excluded from the merge, never fatal
/// to the other branches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("rate-limited on {domain}")]
    RateLimited { domain: String },

    #[error("adapter timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("adapter failed: {0}")]
    Adapter(String),

    /// The adapter broke its contract, e.g. tagged articles with another source name.
    #[error("adapter contract violation: {0}")]
    Contract(String),

    #[error("adapter panicked: {0}")]
    Panicked(String),
}

impl SourceError {
    /// Stable label used in metrics and events.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::Timeout { .. } => "timeout",
            SourceError::Adapter(_) => "adapter",
            SourceError::Contract(_) => "contract",
            SourceError::Panicked(_) => "panicked",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }
}

impl From<FetchError> for SourceError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::RateLimited { domain } => SourceError::RateLimited { domain },
            other => SourceError::Adapter(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_is_distinguishable() {
        let e = FetchError::RateLimited {
            domain: "example.com".into(),
        };
        assert!(e.is_rate_limited());
        assert!(!e.is_transport());
        assert!(e.to_string().starts_with("rate-limited"));

        let s: SourceError = e.into();
        assert!(s.is_rate_limited());
        assert_eq!(s.kind(), "rate_limited");
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Status(503).is_transient());
        assert!(FetchError::Status(429).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(FetchError::Timeout.is_transient());
        assert!(!FetchError::Internal("boom".into()).is_transient());
        assert!(!FetchError::Internal("boom".into()).is_transport());
    }

    #[test]
    fn test_fetch_error_maps_to_adapter_failure() {
        let s: SourceError = FetchError::Status(500).into();
        assert_eq!(s.kind(), "adapter");
        assert_eq!(s.to_string(), "adapter failed: HTTP status 500");
    }
}
