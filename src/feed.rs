//! Feed Service: filtering and pagination over the merged article list.
//!
//! Articles are ordered newest first, undated ones last. `source` and
//! `region` filters compare case-insensitively. Pages are 1-based; an
//! out-of-range page is simply empty.

use crate::models::Article;
use crate::orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const DEFAULT_PER_PAGE: usize = 20;
pub const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedQuery {
    pub page: usize,
    pub per_page: usize,
    pub source: Option<String>,
    pub region: Option<String>,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            source: None,
            region: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedPage {
    pub items: Vec<Article>,
    pub page: usize,
    pub per_page: usize,
    /// Matching articles across all pages.
    pub total: usize,
    pub total_pages: usize,
}

fn matches(filter: Option<&str>, value: &str) -> bool {
    filter
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .is_none_or(|f| f.eq_ignore_ascii_case(value))
}

/// Apply `query` to an already merged article list.
pub fn paginate(mut articles: Vec<Article>, query: &FeedQuery) -> FeedPage {
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, MAX_PER_PAGE);

    articles.retain(|a| {
        matches(query.source.as_deref(), &a.source) && matches(query.region.as_deref(), &a.region)
    });
    // Stable sort: equal dates keep merge order.
    articles.sort_by_key(|a| (a.published_date.is_none(), Reverse(a.published_date)));

    let total = articles.len();
    let total_pages = total.div_ceil(per_page);
    let items = articles
        .into_iter()
        .skip((page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();

    FeedPage {
        items,
        page,
        per_page,
        total,
        total_pages,
    }
}

#[derive(Debug, Clone)]
pub struct FeedService {
    orchestrator: Arc<Orchestrator>,
}

impl FeedService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    #[instrument(level = "info", skip(self))]
    pub async fn get_feed(&self, query: &FeedQuery) -> FeedPage {
        let articles = self.orchestrator.get_all_articles().await;
        let page = paginate(articles, query);
        debug!(total = page.total, returned = page.items.len(), "Built feed page");
        page
    }
}
