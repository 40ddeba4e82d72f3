//! Static adapter serving a fixed article list.
//!
//! Used in mock mode and in tests. Articles are re-tagged with the adapter's
//! name so the source contract holds no matter what the config says.

use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::models::Article;
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FixtureSource {
    name: String,
    domain: String,
    articles: Vec<Article>,
}

impl FixtureSource {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, articles: Vec<Article>) -> Self {
        let name = name.into();
        let articles = articles
            .into_iter()
            .map(|mut a| {
                a.source = name.clone();
                a
            })
            .collect();
        Self {
            name,
            domain: domain.into(),
            articles,
        }
    }
}

#[async_trait]
impl SourceAdapter for FixtureSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    async fn produce_articles(&self) -> Result<Vec<Article>, SourceError> {
        debug!(source = %self.name, count = self.articles.len(), "serving fixture articles");
        Ok(self.articles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_retags_source() {
        let a = Article::new("T", "https://f.example/1", "whatever", None, None);
        let src = FixtureSource::new("fixture", "f.example", vec![a]);
        let out = src.produce_articles().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, "fixture");
        assert_eq!(src.domain(), "f.example");
    }
}
