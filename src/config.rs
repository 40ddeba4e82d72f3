//! YAML configuration for the feed.
//!
//! Everything the core needs arrives here as plain values: which sources are
//! enabled (the default source always first), their request rates, the cache
//! TTL, the per-adapter timeout and the mock toggle. Environment and CLI
//! overrides are applied by the binary on top of the loaded [`Settings`].
//!
//! ```yaml
//! user_agent: "news_fanout/0.1"
//! default_source: cnn
//! enabled_sources: [cnn, bbc]
//! cache_ttl_minutes: 15
//! sources:
//!   cnn:
//!     kind: html
//!     domain: lite.cnn.com
//!     urls: ["https://lite.cnn.com"]
//!     requests_per_minute: 20
//!     html: { item: ".card--lite", title: "a" }
//!   bbc:
//!     kind: rss
//!     domain: feeds.bbci.co.uk
//!     urls: ["https://feeds.bbci.co.uk/news/rss.xml"]
//!     default_region: Europe
//! ```

use crate::adapter::SourceAdapter;
use crate::compliance::Denylist;
use crate::error::ConfigError;
use crate::fetch::PageFetcher;
use crate::limiter::{DEFAULT_MAX_QUEUED, DEFAULT_REQUESTS_PER_MINUTE, RateLimiterConfig};
use crate::models::{Article, DEFAULT_REGION};
use crate::sources::{FixtureSource, HtmlListingSource, HtmlSelectors, RssSource};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/feed.yaml";
/// One week.
pub const MAX_CACHE_TTL_MINUTES: u64 = 7 * 24 * 60;
pub const DEFAULT_USER_AGENT: &str = concat!("news_fanout/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Html,
    Fixture,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Registered domain, the rate-limit key for whole runs of this source.
    pub domain: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub default_region: Option<String>,
    #[serde(default)]
    pub html: Option<HtmlSelectors>,
    /// Served by `fixture` sources, and by every source in mock mode.
    #[serde(default)]
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DenylistSettings {
    #[serde(default)]
    pub domains: Vec<String>,
    /// Regular expressions matched against the full URL.
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub user_agent: String,
    pub default_source: String,
    pub enabled_sources: Vec<String>,
    pub default_requests_per_minute: u32,
    pub cache_ttl_minutes: u64,
    pub adapter_timeout_secs: u64,
    pub max_queued_per_domain: usize,
    pub use_mock: bool,
    pub denylist: DenylistSettings,
    pub default_region: String,
    pub sources: BTreeMap<String, SourceSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_source: String::new(),
            enabled_sources: Vec::new(),
            default_requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            cache_ttl_minutes: 15,
            adapter_timeout_secs: 30,
            max_queued_per_domain: DEFAULT_MAX_QUEUED,
            use_mock: false,
            denylist: DenylistSettings::default(),
            default_region: DEFAULT_REGION.to_string(),
            sources: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Read, parse and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_yaml(&content)?;
        info!(path = %path.display(), sources = settings.sources.len(), "Loaded configuration");
        Ok(settings)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Ordered, de-duplicated source names with `default_source` first.
    pub fn enabled_source_names(&self) -> Vec<String> {
        std::iter::once(&self.default_source)
            .chain(self.enabled_sources.iter())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unique()
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = self.enabled_source_names();
        if names.is_empty() {
            return Err(ConfigError::Invalid(
                "no sources enabled and no default_source set".into(),
            ));
        }
        if let Some(unknown) = names.iter().find(|n| !self.sources.contains_key(*n)) {
            return Err(ConfigError::Invalid(format!("unknown source {:?}", unknown)));
        }
        if self.default_requests_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "default_requests_per_minute must be positive".into(),
            ));
        }
        if self.cache_ttl_minutes == 0 || self.cache_ttl_minutes > MAX_CACHE_TTL_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "cache_ttl_minutes must be between 1 and {}",
                MAX_CACHE_TTL_MINUTES
            )));
        }
        if self.adapter_timeout_secs == 0 {
            return Err(ConfigError::Invalid("adapter_timeout_secs must be positive".into()));
        }

        for (name, source) in &self.sources {
            if source.requests_per_minute == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "source {:?}: requests_per_minute must be positive",
                    name
                )));
            }
            if source.domain.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("source {:?}: empty domain", name)));
            }
            if source.kind == SourceKind::Html && source.html.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "source {:?}: html sources need selectors",
                    name
                )));
            }
        }
        self.denylist()?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60))
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Limiter settings with per-domain overrides taken from each source.
    pub fn limiter_config(&self) -> RateLimiterConfig {
        let base = RateLimiterConfig {
            default_rpm: self.default_requests_per_minute,
            max_queued: self.max_queued_per_domain,
            ..RateLimiterConfig::default()
        };
        self.sources
            .values()
            .filter_map(|s| s.requests_per_minute.map(|rpm| (s.domain.as_str(), rpm)))
            .fold(base, |config, (domain, rpm)| config.with_domain_rpm(domain, rpm))
    }

    pub fn denylist(&self) -> Result<Denylist, ConfigError> {
        Denylist::new(&self.denylist.domains, &self.denylist.patterns)
            .map_err(|e| ConfigError::Invalid(format!("denylist pattern: {}", e)))
    }

    /// Instantiate the enabled adapters in order. In mock mode every source
    /// serves its configured `articles` and nothing touches the network.
    pub fn build_adapters(
        &self,
        fetcher: Arc<PageFetcher>,
    ) -> Result<Vec<Arc<dyn SourceAdapter>>, ConfigError> {
        self.enabled_source_names()
            .into_iter()
            .map(|name| {
                let source = self
                    .sources
                    .get(&name)
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown source {:?}", name)))?;
                let region = source
                    .default_region
                    .clone()
                    .or_else(|| Some(self.default_region.clone()));

                let adapter: Arc<dyn SourceAdapter> = match source.kind {
                    _ if self.use_mock => Arc::new(FixtureSource::new(
                        &name,
                        &source.domain,
                        source.articles.clone(),
                    )),
                    SourceKind::Fixture => Arc::new(FixtureSource::new(
                        &name,
                        &source.domain,
                        source.articles.clone(),
                    )),
                    SourceKind::Rss => Arc::new(RssSource::new(
                        &name,
                        &source.domain,
                        source.urls.clone(),
                        region,
                        fetcher.clone(),
                    )),
                    SourceKind::Html => {
                        let selectors = source.html.clone().unwrap_or_default();
                        Arc::new(
                            HtmlListingSource::new(
                                &name,
                                &source.domain,
                                source.urls.clone(),
                                &selectors,
                                region,
                                fetcher.clone(),
                            )
                            .map_err(|e| ConfigError::Invalid(format!("source {:?}: {}", name, e)))?,
                        )
                    }
                };
                debug!(source = %name, kind = ?source.kind, mock = self.use_mock, "Built adapter");
                Ok(adapter)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
user_agent: "test-agent/1.0"
default_source: cnn
enabled_sources: [bbc, cnn, bbc]
cache_ttl_minutes: 5
denylist:
  domains: [ads.example]
  patterns: ["/video/"]
sources:
  cnn:
    kind: html
    domain: lite.cnn.com
    urls: ["https://lite.cnn.com"]
    requests_per_minute: 20
    html:
      item: ".card--lite"
      title: "a"
  bbc:
    kind: rss
    domain: feeds.bbci.co.uk
    urls: ["https://feeds.bbci.co.uk/news/rss.xml"]
    default_region: Europe
    articles:
      - title: "Canned"
        url: "https://feeds.bbci.co.uk/canned"
"#;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.user_agent, "test-agent/1.0");
        assert_eq!(settings.cache_ttl(), Duration::from_secs(300));
        assert_eq!(settings.adapter_timeout(), Duration::from_secs(30));
        assert_eq!(settings.default_requests_per_minute, 30);
        assert_eq!(settings.sources["cnn"].kind, SourceKind::Html);
        assert_eq!(settings.sources["bbc"].articles[0].region, DEFAULT_REGION);
    }

    #[test]
    fn test_enabled_sources_default_first_and_unique() {
        let settings = Settings::from_yaml(YAML).unwrap();
        assert_eq!(settings.enabled_source_names(), ["cnn", "bbc"]);
    }

    #[test]
    fn test_limiter_overrides_and_denylist() {
        let settings = Settings::from_yaml(YAML).unwrap();
        let limiter = settings.limiter_config();
        assert_eq!(limiter.default_rpm, 30);
        assert_eq!(limiter.domain_rpm.get("lite.cnn.com"), Some(&20));

        let denylist = settings.denylist().unwrap();
        assert!(denylist.denies(&url::Url::parse("https://ads.example/x").unwrap()));
        assert!(denylist.denies(&url::Url::parse("https://lite.cnn.com/video/1").unwrap()));
    }

    #[test]
    fn test_validation_errors() {
        let unknown = YAML.replace("enabled_sources: [bbc, cnn, bbc]", "enabled_sources: [npr]");
        assert!(matches!(
            Settings::from_yaml(&unknown),
            Err(ConfigError::Invalid(_))
        ));

        let zero_ttl = YAML.replace("cache_ttl_minutes: 5", "cache_ttl_minutes: 0");
        assert!(Settings::from_yaml(&zero_ttl).is_err());

        let zero_rpm = YAML.replace("requests_per_minute: 20", "requests_per_minute: 0");
        assert!(Settings::from_yaml(&zero_rpm).is_err());

        let bad_pattern = YAML.replace(r#""/video/""#, r#""(unclosed""#);
        assert!(Settings::from_yaml(&bad_pattern).is_err());

        assert!(matches!(
            Settings::from_yaml("sources: [not, a, map]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_huge_cache_ttl_rejected_without_overflow() {
        let huge = YAML.replace("cache_ttl_minutes: 5", &format!("cache_ttl_minutes: {}", u64::MAX));
        assert!(matches!(
            Settings::from_yaml(&huge),
            Err(ConfigError::Invalid(_))
        ));

        let settings = Settings {
            cache_ttl_minutes: u64::MAX,
            ..Settings::default()
        };
        assert_eq!(settings.cache_ttl(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
