//! Command-line interface definitions for news_fanout.
//!
//! Source selection, cache TTL and mock mode can also come from the
//! environment (`FEED_SOURCES`, `FEED_CACHE_TTL_MINUTES`, `FEED_USE_MOCK`);
//! flags win over the config file.

use crate::config::{DEFAULT_CONFIG_PATH, Settings};
use crate::feed::{DEFAULT_PER_PAGE, FeedQuery};
use clap::Parser;

/// Run one orchestration cycle and print a feed page as JSON.
///
/// # Examples
///
/// ```sh
/// # First page from every enabled source
/// news_fanout --config config/feed.yaml
///
/// # Offline run from fixtures, page 2 of BBC only, with health metrics
/// news_fanout --mock --source bbc --page 2 --metrics
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Comma-separated source names, replaces `enabled_sources`
    #[arg(long, env = "FEED_SOURCES", value_delimiter = ',')]
    pub sources: Option<Vec<String>>,

    /// Cache TTL in minutes
    #[arg(long, env = "FEED_CACHE_TTL_MINUTES")]
    pub cache_ttl_minutes: Option<u64>,

    /// Serve configured fixture articles instead of fetching
    #[arg(long, env = "FEED_USE_MOCK")]
    pub mock: bool,

    /// 1-based page number
    #[arg(short, long, default_value_t = 1)]
    pub page: usize,

    /// Articles per page (max 100)
    #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
    pub per_page: usize,

    /// Only articles from this source
    #[arg(short, long)]
    pub source: Option<String>,

    /// Only articles from this region
    #[arg(short, long)]
    pub region: Option<String>,

    /// Also print per-source health metrics
    #[arg(long)]
    pub metrics: bool,
}

impl Cli {
    /// Layer flag and env overrides onto file settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(sources) = &self.sources {
            settings.enabled_sources = sources
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(ttl) = self.cache_ttl_minutes {
            settings.cache_ttl_minutes = ttl;
        }
        if self.mock {
            settings.use_mock = true;
        }
    }

    pub fn query(&self) -> FeedQuery {
        FeedQuery {
            page: self.page,
            per_page: self.per_page,
            source: self.source.clone(),
            region: self.region.clone(),
        }
    }
}
