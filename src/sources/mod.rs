//! Concrete source adapters.
//!
//! | Kind | Module | Method | Notes |
//! |------|--------|--------|-------|
//! | RSS 2.0 | [`rss`] | XML feed | title / link / pubDate per `<item>` |
//! | HTML listing | [`html`] | CSS selectors | relative links resolved against the page |
//! | Fixture | [`fixture`] | static list | used when mock mode is on |
//!
//! Network-backed adapters fetch every URL through
//! [`PageFetcher`](crate::fetch::PageFetcher), so compliance and rate limiting
//! apply per request. A URL that fails or is denied contributes nothing; the
//! other URLs of the same source continue.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

pub mod fixture;
pub mod html;
pub mod rss;

pub use fixture::FixtureSource;
pub use html::{HtmlListingSource, HtmlSelectors};
pub use rss::RssSource;

/// Collapse runs of whitespace and trim.
pub fn normalize_text(s: &str) -> String {
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
    RE_WS.replace_all(s, " ").trim().to_string()
}

/// Parse the date formats listings commonly use: RFC 2822 (RSS) and RFC 3339.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hello \n\t world  "), "Hello world");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_parse_date_formats() {
        let rss = parse_date("Tue, 06 May 2025 14:30:00 +0200").unwrap();
        assert_eq!(rss.hour(), 12);
        let iso = parse_date("2025-05-06T14:30:00Z").unwrap();
        assert_eq!(iso.day(), 6);
        assert!(parse_date("yesterday").is_none());
    }
}
