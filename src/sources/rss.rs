//! RSS 2.0 feed adapter.
//!
//! Each configured feed URL is fetched through the gated fetcher and its
//! `<item>`s mapped to articles. Items without a title or link are skipped;
//! relative links are resolved against the feed URL.

use super::{normalize_text, parse_date};
use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::models::Article;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use quick_xml::de::{DeError, from_str};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// HTML entities that are not valid XML and make feeds unparseable.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Parse an RSS document into articles tagged with `source`.
pub fn parse_feed(
    source: &str,
    feed_url: &str,
    xml: &str,
    region: Option<&str>,
) -> Result<Vec<Article>, DeError> {
    let rss: Rss = from_str(&scrub_html_entities_for_xml(xml))?;
    let base = Url::parse(feed_url).ok();

    let articles = rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let link = it.link.as_deref().map(str::trim).unwrap_or_default();
            if title.is_empty() || link.is_empty() {
                return None;
            }
            let url = match &base {
                Some(base) => base.join(link).ok()?.to_string(),
                None => Url::parse(link).ok()?.to_string(),
            };
            let published = it.pub_date.as_deref().and_then(parse_date);
            Some(Article::new(
                title,
                url,
                source,
                published,
                region.map(str::to_string),
            ))
        })
        .collect();
    Ok(articles)
}

pub struct RssSource {
    name: String,
    domain: String,
    feed_urls: Vec<String>,
    region: Option<String>,
    fetcher: Arc<PageFetcher>,
}

impl RssSource {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        feed_urls: Vec<String>,
        region: Option<String>,
        fetcher: Arc<PageFetcher>,
    ) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            feed_urls,
            region,
            fetcher,
        }
    }

    /// Articles of one feed. Only a rate-limiter drop is an error; other
    /// failures skip the feed.
    async fn fetch_feed(&self, url: &str) -> Result<Vec<Article>, SourceError> {
        match self.fetcher.fetch_text(url).await {
            Ok(Some(body)) => match parse_feed(&self.name, url, &body, self.region.as_deref()) {
                Ok(articles) => {
                    debug!(source = %self.name, %url, count = articles.len(), "Parsed feed");
                    Ok(articles)
                }
                Err(e) => {
                    warn!(source = %self.name, %url, error = %e, "Feed parse failed");
                    Ok(Vec::new())
                }
            },
            Ok(None) => Ok(Vec::new()),
            Err(e) if e.is_rate_limited() => Err(e.into()),
            Err(e) => {
                warn!(source = %self.name, %url, error = %e, "Feed fetch failed");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    #[instrument(level = "info", skip_all, fields(source = %self.name))]
    async fn produce_articles(&self) -> Result<Vec<Article>, SourceError> {
        let articles: Vec<Article> = stream::iter(self.feed_urls.iter())
            .then(|url| self.fetch_feed(url))
            .boxed()
            .try_concat()
            .await?;
        info!(count = articles.len(), "Collected feed articles");
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example&nbsp;News</title>
    <item>
      <title>  Markets   rally &ndash; again </title>
      <link>https://news.example/markets/rally</link>
      <pubDate>Tue, 06 May 2025 14:30:00 GMT</pubDate>
    </item>
    <item>
      <title>Relative link</title>
      <link>/world/story</link>
    </item>
    <item>
      <title></title>
      <link>https://news.example/untitled</link>
    </item>
    <item>
      <title>No link</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_items() {
        let articles = parse_feed("example", "https://news.example/rss.xml", FEED, None).unwrap();
        assert_eq!(articles.len(), 2);

        assert_eq!(articles[0].title, "Markets rally - again");
        assert_eq!(articles[0].url, "https://news.example/markets/rally");
        assert_eq!(articles[0].source, "example");
        assert!(articles[0].published_date.is_some());
        assert_eq!(articles[0].region, crate::models::DEFAULT_REGION);

        assert_eq!(articles[1].url, "https://news.example/world/story");
        assert!(articles[1].published_date.is_none());
    }

    #[test]
    fn test_parse_feed_region_and_empty_channel() {
        let xml = r#"<rss><channel><item><title>A</title><link>https://x.example/a</link></item></channel></rss>"#;
        let articles = parse_feed("x", "https://x.example/feed", xml, Some("Europe")).unwrap();
        assert_eq!(articles[0].region, "Europe");

        let empty = r#"<rss><channel><title>nothing</title></channel></rss>"#;
        assert!(parse_feed("x", "https://x.example/feed", empty, None).unwrap().is_empty());
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(parse_feed("x", "https://x.example/feed", "<html>", None).is_err());
    }
}
