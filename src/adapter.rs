//! The capability every news source implements.
//!
//! An adapter only knows how to turn its source into [`Article`]s. Caching,
//! rate limiting, health tracking and timeouts are applied uniformly around
//! it by the [`Orchestrator`](crate::orchestrator::Orchestrator).
//!
//! Contract for implementors:
//! - ordinary fetch/parse problems are not errors: skip the URL and return
//!   whatever was collected, possibly nothing
//! - every URL must go through [`PageFetcher`](crate::fetch::PageFetcher)
//!   (or an equivalent compliance check) before it is requested
//! - every article carries `source == self.name()`
//! - `Err` is for broken invariants, and for a request the rate limiter
//!   dropped (`SourceError::RateLimited`), so the drop counts against the source

use crate::error::SourceError;
use crate::models::Article;
use async_trait::async_trait;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique source name, also the article `source` tag and cache key part.
    fn name(&self) -> &str;

    /// Registered domain used to rate limit invocations of this adapter.
    fn domain(&self) -> &str;

    async fn produce_articles(&self) -> Result<Vec<Article>, SourceError>;
}
