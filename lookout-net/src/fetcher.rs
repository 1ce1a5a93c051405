//! Tiered, deduplicating feed fetcher
//!
//! Walks a [`FetchPlan`] tier by tier. Sources inside a tier are fetched
//! concurrently (bounded by `fetch.max_concurrent`); entries inside one
//! source are processed sequentially so feed order is preserved and every
//! request to an origin goes through the [`PolitenessTracker`].

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lookout_core::{Article, FetchPlan, FetchSettings, SeenGuidSet, SourceConfig, SourceKind, Tier};

use crate::{
    extract_content, origin_of, parse_feed, parse_listing, FeedEntry, FetchError,
    PolitenessTracker, RelevanceClassifier, SharedTransport,
};

/// A source that produced no articles this run
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Everything one `fetch_all` call produced
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// New articles, feed order preserved within each source
    pub articles: Vec<Article>,
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub failed_sources: Vec<SourceFailure>,
    /// Entries dropped because their guid was already seen
    pub duplicates: usize,
    /// Entries that could not be interpreted
    pub skipped_entries: usize,
    pub irrelevant: usize,
    /// Relevant articles that fell back to the feed summary
    pub full_text_failures: usize,
    pub cancelled: bool,
}

impl FetchReport {
    /// Articles worth sending to extraction
    pub fn relevant_articles(&self) -> impl Iterator<Item = &Article> {
        self.articles.iter().filter(|a| a.relevant)
    }

    fn absorb(&mut self, outcome: SourceOutcome) {
        if !outcome.started {
            self.cancelled = true;
            return;
        }

        self.sources_attempted += 1;
        self.duplicates += outcome.duplicates;
        self.skipped_entries += outcome.skipped;
        self.irrelevant += outcome.irrelevant;
        self.full_text_failures += outcome.full_text_failures;
        self.cancelled |= outcome.cancelled;
        self.articles.extend(outcome.articles);

        match outcome.error {
            None => self.sources_succeeded += 1,
            Some(reason) => self.failed_sources.push(SourceFailure {
                source: outcome.source,
                reason,
            }),
        }
    }
}

/// Result of processing one source
#[derive(Debug, Default)]
struct SourceOutcome {
    source: String,
    started: bool,
    articles: Vec<Article>,
    duplicates: usize,
    skipped: usize,
    irrelevant: usize,
    full_text_failures: usize,
    cancelled: bool,
    error: Option<String>,
}

/// Retrieves candidate articles from configured sources
pub struct FeedFetcher {
    transport: SharedTransport,
    politeness: Arc<PolitenessTracker>,
    seen: Arc<SeenGuidSet>,
    classifier: RelevanceClassifier,
    settings: FetchSettings,
}

impl FeedFetcher {
    pub fn new(
        transport: SharedTransport,
        politeness: Arc<PolitenessTracker>,
        seen: Arc<SeenGuidSet>,
        classifier: RelevanceClassifier,
        settings: FetchSettings,
    ) -> Self {
        Self {
            transport,
            politeness,
            seen,
            classifier,
            settings,
        }
    }

    pub fn seen(&self) -> &Arc<SeenGuidSet> {
        &self.seen
    }

    /// Fetch every active source up to and including `max_tier`
    pub async fn fetch_all(
        &self,
        sources: &[SourceConfig],
        max_tier: Tier,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let plan = FetchPlan::new(sources, max_tier);
        self.fetch_plan(&plan, cancel).await
    }

    /// Fetch an explicit tier plan, fastest tier first
    pub async fn fetch_plan(&self, plan: &FetchPlan, cancel: &CancellationToken) -> FetchReport {
        let mut report = FetchReport::default();
        let concurrency = self.settings.max_concurrent.max(1);

        for group in plan.tiers() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            info!(
                tier = ?group.tier,
                sources = group.sources.len(),
                "Fetching tier"
            );

            let outcomes: Vec<SourceOutcome> = stream::iter(group.sources.iter())
                .map(|source| self.fetch_source(source, cancel))
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                report.absorb(outcome);
            }
        }

        info!(
            articles = report.articles.len(),
            attempted = report.sources_attempted,
            succeeded = report.sources_succeeded,
            duplicates = report.duplicates,
            cancelled = report.cancelled,
            "Fetch complete"
        );

        report
    }

    async fn fetch_source(&self, source: &SourceConfig, cancel: &CancellationToken) -> SourceOutcome {
        let mut outcome = SourceOutcome {
            source: source.name.clone(),
            ..Default::default()
        };

        if cancel.is_cancelled() {
            return outcome;
        }
        outcome.started = true;

        let entries = match self.retrieve_entries(source).await {
            Ok((entries, skipped)) => {
                outcome.skipped = skipped;
                entries
            }
            Err(e) => {
                warn!(source = %source.name, error = %e, "Source fetch failed, skipping");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        debug!(source = %source.name, entries = entries.len(), "Parsed source");

        for entry in entries {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            if !self.seen.insert(&entry.guid) {
                outcome.duplicates += 1;
                continue;
            }

            let article = self.build_article(source, entry).await;
            if !article.relevant {
                outcome.irrelevant += 1;
            } else if !article.fetch_succeeded {
                outcome.full_text_failures += 1;
            }
            outcome.articles.push(article);
        }

        info!(
            source = %source.name,
            new = outcome.articles.len(),
            duplicates = outcome.duplicates,
            "Source done"
        );

        outcome
    }

    async fn retrieve_entries(&self, source: &SourceConfig) -> Result<(Vec<FeedEntry>, usize), FetchError> {
        self.politeness.await_clearance(&origin_of(&source.url)).await;
        let body = self.transport.get(&source.url).await?;

        let parsed = match source.kind {
            SourceKind::Feed => parse_feed(&body, &source.url)?,
            SourceKind::Page => parse_listing(&body, &source.url)?,
        };
        Ok((parsed.entries, parsed.skipped))
    }

    async fn build_article(&self, source: &SourceConfig, entry: FeedEntry) -> Article {
        let verdict = self.classifier.classify(&entry.title, &entry.summary);

        let fallback = if entry.summary.is_empty() {
            entry.title.clone()
        } else {
            entry.summary.clone()
        };

        let (content, fetch_succeeded) = if verdict.relevant && self.settings.fetch_full_text {
            match self.fetch_full_text(&entry.url).await {
                Ok(text) => (text, true),
                Err(e) => {
                    debug!(url = %entry.url, error = %e, "Full text unavailable, using summary");
                    (fallback, false)
                }
            }
        } else {
            (fallback, true)
        };

        Article {
            url: entry.url,
            title: entry.title,
            summary: entry.summary,
            content,
            source: source.name.clone(),
            published: entry.published,
            guid: entry.guid,
            fetch_succeeded,
            relevant: verdict.relevant,
        }
    }

    async fn fetch_full_text(&self, url: &str) -> Result<String, FetchError> {
        self.politeness.await_clearance(&origin_of(url)).await;
        let html = self.transport.get(url).await?;
        let page = extract_content(&html, self.settings.max_content_chars);

        if page.text.is_empty() {
            return Err(FetchError::Parse {
                url: url.to_string(),
                reason: "no readable text".to_string(),
            });
        }
        Ok(page.text)
    }
}
