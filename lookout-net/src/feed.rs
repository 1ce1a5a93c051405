//! Feed and listing-page parsing
//!
//! Turns a fetched source document into ordered [`FeedEntry`]s. Entries that
//! cannot be interpreted are skipped individually; only an unparseable
//! document fails the whole source.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use lookout_core::derive_guid;

use crate::{html_to_text, normalize_whitespace, FetchError};

/// Minimum headline length for links scraped from listing pages
const MIN_HEADLINE_CHARS: usize = 25;

/// One item from a source, in source order
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub guid: String,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
}

/// Parsed entries plus the count of entries that had to be skipped
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub entries: Vec<FeedEntry>,
    pub skipped: usize,
}

/// Parse an RSS, Atom or JSON feed
///
/// Entries without a publisher id get a guid derived from their link, so an
/// edited headline does not turn a known article into a new one.
pub fn parse_feed(body: &str, source_url: &str) -> Result<ParsedSource, FetchError> {
    // feed-rs would otherwise hash link + title into missing ids
    let parser = feed_rs::parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build();

    let feed = parser.parse(body.as_bytes()).map_err(|e| FetchError::Parse {
        url: source_url.to_string(),
        reason: e.to_string(),
    })?;

    let mut parsed = ParsedSource::default();

    for entry in feed.entries {
        let url = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .filter(|href| !href.is_empty())
            .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));

        let Some(url) = url else {
            debug!("Skipping entry without link in {}", source_url);
            parsed.skipped += 1;
            continue;
        };

        let title = entry
            .title
            .map(|t| html_to_text(&t.content))
            .unwrap_or_default();
        if title.is_empty() {
            debug!("Skipping untitled entry {} in {}", url, source_url);
            parsed.skipped += 1;
            continue;
        }

        let summary = entry
            .summary
            .map(|s| html_to_text(&s.content))
            .or_else(|| entry.content.and_then(|c| c.body).map(|b| html_to_text(&b)))
            .unwrap_or_default();

        let guid = if entry.id.trim().is_empty() {
            derive_guid(&url)
        } else {
            entry.id.trim().to_string()
        };

        parsed.entries.push(FeedEntry {
            guid,
            url,
            title,
            summary,
            published: entry.published.or(entry.updated),
        });
    }

    Ok(parsed)
}

/// Extract headline links from an HTML listing page
pub fn parse_listing(html: &str, page_url: &str) -> Result<ParsedSource, FetchError> {
    let base = Url::parse(page_url).map_err(|_| FetchError::InvalidUrl(page_url.to_string()))?;
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]").map_err(|e| FetchError::Parse {
        url: page_url.to_string(),
        reason: e.to_string(),
    })?;

    let mut parsed = ParsedSource::default();
    let mut seen_urls: HashSet<String> = HashSet::new();

    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        let Ok(mut resolved) = base.join(href.trim()) else {
            parsed.skipped += 1;
            continue;
        };
        resolved.set_fragment(None);

        // Stay on the publisher's site and skip section roots
        if resolved.host_str() != base.host_str() || resolved.path().trim_matches('/').is_empty() {
            continue;
        }

        let title = normalize_whitespace(&element.text().collect::<String>());
        if title.chars().count() < MIN_HEADLINE_CHARS {
            continue;
        }

        let url = resolved.to_string();
        if !seen_urls.insert(url.trim_end_matches('/').to_string()) {
            continue;
        }

        parsed.entries.push(FeedEntry {
            guid: derive_guid(&url),
            url,
            title,
            summary: String::new(),
            published: None,
        });
    }

    Ok(parsed)
}
