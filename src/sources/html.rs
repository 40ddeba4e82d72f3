//! HTML listing page adapter.
//!
//! Scrapes one or more listing pages with CSS selectors. Each element
//! matching `item` becomes one article:
//!
//! - title: text of the first `title` match inside the item, or the item's own text
//! - link: `href` of the first `link` match (default `a[href]`), or the item's own `href`
//! - date: `datetime` attribute or text of the first `date` match, when configured
//!
//! Links are resolved against the page URL, so relative hrefs like
//! `/2025/05/06/story` become absolute.

use super::{normalize_text, parse_date};
use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::models::Article;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

const DEFAULT_LINK_SELECTOR: &str = "a[href]";

/// CSS selectors describing a listing page, as written in config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HtmlSelectors {
    pub item: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone)]
struct Compiled {
    item: Selector,
    title: Option<Selector>,
    link: Selector,
    date: Option<Selector>,
}

fn compile(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("bad selector {:?}: {}", css, e))
}

impl Compiled {
    fn new(s: &HtmlSelectors) -> Result<Self, String> {
        Ok(Self {
            item: compile(&s.item)?,
            title: s.title.as_deref().map(compile).transpose()?,
            link: compile(s.link.as_deref().unwrap_or(DEFAULT_LINK_SELECTOR))?,
            date: s.date.as_deref().map(compile).transpose()?,
        })
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// Extract articles from one listing page. Sync because [`Html`] is not `Send`.
fn parse_listing(
    source: &str,
    page_url: &Url,
    html: &str,
    sel: &Compiled,
    region: Option<&str>,
) -> Vec<Article> {
    let document = Html::parse_document(html);
    let mut articles = Vec::new();

    for item in document.select(&sel.item) {
        let title = match &sel.title {
            Some(t) => item.select(t).next().map(element_text),
            None => Some(element_text(item)),
        }
        .unwrap_or_default();

        let href = item
            .value()
            .attr("href")
            .or_else(|| item.select(&sel.link).find_map(|a| a.value().attr("href")));

        let Some(href) = href.map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }
        let Ok(url) = page_url.join(href) else {
            debug!(%href, "unresolvable link");
            continue;
        };

        let published = sel.date.as_ref().and_then(|d| {
            item.select(d).next().and_then(|el| {
                el.value()
                    .attr("datetime")
                    .and_then(parse_date)
                    .or_else(|| parse_date(&element_text(el)))
            })
        });

        articles.push(Article::new(
            title,
            url.to_string(),
            source,
            published,
            region.map(str::to_string),
        ));
    }
    articles
}

pub struct HtmlListingSource {
    name: String,
    domain: String,
    pages: Vec<String>,
    selectors: Compiled,
    region: Option<String>,
    fetcher: Arc<PageFetcher>,
}

impl HtmlListingSource {
    /// Fails when a selector does not parse.
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        pages: Vec<String>,
        selectors: &HtmlSelectors,
        region: Option<String>,
        fetcher: Arc<PageFetcher>,
    ) -> Result<Self, String> {
        Ok(Self {
            name: name.into(),
            domain: domain.into(),
            pages,
            selectors: Compiled::new(selectors)?,
            region,
            fetcher,
        })
    }

    async fn fetch_page(&self, page: &str) -> Result<Vec<Article>, SourceError> {
        let page_url = match Url::parse(page) {
            Ok(u) => u,
            Err(e) => {
                warn!(source = %self.name, %page, error = %e, "Invalid listing URL");
                return Ok(Vec::new());
            }
        };
        match self.fetcher.fetch_text(page).await {
            Ok(Some(body)) => {
                let articles = parse_listing(
                    &self.name,
                    &page_url,
                    &body,
                    &self.selectors,
                    self.region.as_deref(),
                );
                debug!(source = %self.name, %page, count = articles.len(), "Parsed listing");
                Ok(articles)
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) if e.is_rate_limited() => Err(e.into()),
            Err(e) => {
                warn!(source = %self.name, %page, error = %e, "Listing fetch failed");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for HtmlListingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    #[instrument(level = "info", skip_all, fields(source = %self.name))]
    async fn produce_articles(&self) -> Result<Vec<Article>, SourceError> {
        let articles: Vec<Article> = stream::iter(self.pages.iter())
            .then(|page| self.fetch_page(page))
            .boxed()
            .try_concat()
            .await?;
        info!(count = articles.len(), "Collected listing articles");
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
      <ul>
        <li class="card--lite">
          <a href="/2025/05/06/markets">  Markets
             rally </a>
          <time datetime="2025-05-06T14:30:00Z">May 6</time>
        </li>
        <li class="card--lite">
          <a href="https://other.example/world">World news</a>
          <time>Tue, 06 May 2025 10:00:00 GMT</time>
        </li>
        <li class="card--lite"><span>No link here</span></li>
        <li class="card--lite"><a href="/empty"></a></li>
      </ul>
    </body></html>"#;

    fn selectors() -> HtmlSelectors {
        HtmlSelectors {
            item: ".card--lite".into(),
            title: Some("a".into()),
            link: None,
            date: Some("time".into()),
        }
    }

    #[test]
    fn test_parse_listing() {
        let base = Url::parse("https://lite.example.com/").unwrap();
        let compiled = Compiled::new(&selectors()).unwrap();
        let articles = parse_listing("lite", &base, PAGE, &compiled, Some("US"));

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Markets rally");
        assert_eq!(articles[0].url, "https://lite.example.com/2025/05/06/markets");
        assert_eq!(articles[0].region, "US");
        assert!(articles[0].published_date.is_some());

        assert_eq!(articles[1].url, "https://other.example/world");
        assert!(articles[1].published_date.is_some());
        assert!(articles.iter().all(|a| a.source == "lite"));
    }

    #[test]
    fn test_item_as_link() {
        let html = r#"<div><a class="story" href="a.html">First</a><a class="story" href="b.html">Second</a></div>"#;
        let compiled = Compiled::new(&HtmlSelectors {
            item: "a.story".into(),
            ..Default::default()
        })
        .unwrap();
        let base = Url::parse("https://x.example/news/").unwrap();
        let articles = parse_listing("x", &base, html, &compiled, None);

        let urls: Vec<_> = articles.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, ["https://x.example/news/a.html", "https://x.example/news/b.html"]);
        assert_eq!(articles[1].title, "Second");
        assert!(articles[0].published_date.is_none());
    }

    #[test]
    fn test_bad_selector_rejected() {
        let bad = HtmlSelectors {
            item: "[[".into(),
            ..Default::default()
        };
        assert!(Compiled::new(&bad).is_err());
    }
}
