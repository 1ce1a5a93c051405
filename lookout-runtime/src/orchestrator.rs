//! Pipeline Orchestrator
//!
//! Drives one ingestion run through a fixed sequence of stages:
//! `Idle -> Fetching -> Extracting -> Geocoding -> Persisting -> Completed`.
//!
//! Per-article and per-batch problems are absorbed by the stages and only
//! show up in quality samples. The run moves to `Failed` only on a run-level
//! fault: the seen set cannot be flushed or the store rejects a write.

use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lookout_agents::{ExtractionOutcome, ExtractionReport, Extractor, SharedBackend};
use lookout_core::{
    ConfigError, EventStore, ExtractedEvent, GeocodeResult, Geocoder, PipelineConfig, QualityRecorder,
    QualitySample, QualityThresholds, RateGate, Resolution, SeenGuidSet, SeenSetError,
    SharedStore, SourceConfig, Stage, StoreError, Tier,
};
use lookout_net::{
    FeedFetcher, FetchReport, PolitenessTracker, RelevanceClassifier, SharedTransport,
    SourceFailure,
};

/// Run-level faults; the only errors that reach `Failed`
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Could not flush seen set: {0}")]
    SeenSet(#[from] SeenSetError),
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Extracting,
    Geocoding,
    Persisting,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Fetching => "fetching",
            PipelineState::Extracting => "extracting",
            PipelineState::Geocoding => "geocoding",
            PipelineState::Persisting => "persisting",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Cancellation handle plus optional run timeout
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    timeout: Option<Duration>,
}

impl RunControl {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Token that external code (e.g. a Ctrl-C handler) may cancel
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Counts of geocode outcomes by resolution level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionCounts {
    pub settlement: usize,
    pub lga: usize,
    pub state_fallback: usize,
    pub unresolved: usize,
}

impl ResolutionCounts {
    fn add(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Settlement => self.settlement += 1,
            Resolution::Lga => self.lga += 1,
            Resolution::StateFallback => self.state_fallback += 1,
            Resolution::Unresolved => self.unresolved += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.settlement + self.lga + self.state_fallback + self.unresolved
    }
}

/// Summary of one completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: PipelineState,
    pub articles_fetched: usize,
    pub relevant_articles: usize,
    pub duplicates: usize,
    pub failed_sources: Vec<SourceFailure>,
    pub extraction_calls: usize,
    pub events_extracted: usize,
    pub events_rejected: usize,
    pub extraction_failures: usize,
    pub events_persisted: usize,
    pub resolutions: ResolutionCounts,
    pub samples: Vec<QualitySample>,
    pub quota_exhausted: bool,
    pub cancelled: bool,
}

/// Outcome of a geocode backfill pass
#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    pub examined: usize,
    pub resolved: usize,
    pub resolutions: ResolutionCounts,
    pub sample: Option<QualitySample>,
}

/// Everything an orchestrator is built from
pub struct PipelineParts {
    pub fetcher: FeedFetcher,
    pub extractor: Extractor,
    pub geocoder: Arc<Geocoder>,
    pub store: SharedStore,
    pub sources: Vec<SourceConfig>,
    pub quality: QualityThresholds,
    /// Where to flush the seen set after fetching; `None` keeps it in memory
    pub seen_path: Option<PathBuf>,
    pub control: RunControl,
}

/// Shared services injected by the caller of [`PipelineOrchestrator::from_config`]
pub struct PipelineServices {
    pub backend: SharedBackend,
    pub transport: SharedTransport,
    pub store: SharedStore,
    pub geocoder: Arc<Geocoder>,
    pub seen: Arc<SeenGuidSet>,
    /// Write the seen set to `paths.seen_guids` after fetching
    pub persist_seen: bool,
}

/// Sequences fetch, extraction, geocoding and persistence for one run
pub struct PipelineOrchestrator {
    fetcher: FeedFetcher,
    extractor: Extractor,
    geocoder: Arc<Geocoder>,
    store: SharedStore,
    sources: Vec<SourceConfig>,
    quality: QualityRecorder,
    seen_path: Option<PathBuf>,
    control: RunControl,
    state: Mutex<PipelineState>,
}

impl PipelineOrchestrator {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            fetcher: parts.fetcher,
            extractor: parts.extractor,
            geocoder: parts.geocoder,
            store: parts.store,
            sources: parts.sources,
            quality: QualityRecorder::new(parts.quality),
            seen_path: parts.seen_path,
            control: parts.control,
            state: Mutex::new(PipelineState::Idle),
        }
    }

    /// Assemble every stage from validated configuration
    pub fn from_config(config: &PipelineConfig, services: PipelineServices) -> Result<Self, PipelineError> {
        config.validate()?;

        let fetcher = FeedFetcher::new(
            services.transport,
            Arc::new(PolitenessTracker::new(config.min_delay())),
            services.seen,
            RelevanceClassifier::with_extra_keywords(&config.relevance.extra_keywords),
            config.fetch.clone(),
        );
        let gate = Arc::new(RateGate::new(config.rate_gate.capacity, config.rate_gate.refill_per_sec));
        let extractor = Extractor::new(services.backend, gate, config.extraction.clone());

        Ok(Self::new(PipelineParts {
            fetcher,
            extractor,
            geocoder: services.geocoder,
            store: services.store,
            sources: config.effective_sources(),
            quality: config.quality,
            seen_path: services.persist_seen.then(|| config.paths.seen_guids.clone()),
            control: RunControl::new(config.run.timeout()),
        }))
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    fn transition(&self, next: PipelineState) {
        let mut state = self.state.lock();
        info!(from = %*state, to = %next, "Pipeline state");
        *state = next;
    }

    fn fail(&self, err: PipelineError) -> PipelineError {
        error!(error = %err, "Run failed");
        self.transition(PipelineState::Failed);
        err
    }

    /// Execute one ingestion run over sources up to `max_tier`
    pub async fn run(&self, max_tier: Tier) -> Result<RunReport, PipelineError> {
        if self.state().is_terminal() {
            self.transition(PipelineState::Idle);
        }

        // Timeout cancels a child token so the caller's token stays untouched
        let cancel = self.control.token.child_token();
        let watchdog = self.control.timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs_f64(), "Run timeout reached, cancelling");
                cancel.cancel();
            })
        });

        let result = self.run_stages(max_tier, &cancel).await;

        if let Some(handle) = watchdog {
            handle.abort();
        }

        result.map_err(|e| self.fail(e))
    }

    async fn run_stages(&self, max_tier: Tier, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        // Fetch
        self.transition(PipelineState::Fetching);
        let fetched = self.fetcher.fetch_all(&self.sources, max_tier, cancel).await;
        self.record_fetch_quality(&fetched);
        self.flush_seen()?;

        // Extract
        self.transition(PipelineState::Extracting);
        let relevant: Vec<_> = fetched.relevant_articles().cloned().collect();
        let extraction = self.extractor.extract(relevant, cancel).await;
        self.record_extraction_quality(&extraction);

        // Geocode
        self.transition(PipelineState::Geocoding);
        let (located, resolutions) = self.geocode_events(&extraction);

        // Persist
        self.transition(PipelineState::Persisting);
        let mut persisted = 0;
        for (event, geocode) in &located {
            let id = self.store.append_event(event).await?;
            self.store.mark_geocode(id, geocode).await?;
            persisted += 1;
        }

        let samples = self.quality.snapshot_all();
        for sample in &samples {
            self.store.record_quality_sample(sample).await?;
        }

        self.transition(PipelineState::Completed);

        let events_rejected = extraction
            .results
            .iter()
            .filter(|r| matches!(r.outcome, ExtractionOutcome::Rejected(_)))
            .count();

        let report = RunReport {
            state: PipelineState::Completed,
            articles_fetched: fetched.articles.len(),
            relevant_articles: fetched.relevant_articles().count(),
            duplicates: fetched.duplicates,
            failed_sources: fetched.failed_sources.clone(),
            extraction_calls: extraction.calls,
            events_extracted: located.len(),
            events_rejected,
            extraction_failures: extraction.results.len() - extraction.successes(),
            events_persisted: persisted,
            resolutions,
            samples,
            quota_exhausted: extraction.quota_exhausted,
            cancelled: fetched.cancelled || extraction.cancelled || cancel.is_cancelled(),
        };

        info!(
            fetched = report.articles_fetched,
            relevant = report.relevant_articles,
            persisted = report.events_persisted,
            cancelled = report.cancelled,
            "Run completed"
        );

        Ok(report)
    }

    fn flush_seen(&self) -> Result<(), PipelineError> {
        if let Some(path) = &self.seen_path {
            self.fetcher.seen().save(path)?;
            info!(path = %path.display(), guids = self.fetcher.seen().len(), "Seen set flushed");
        }
        Ok(())
    }

    fn record_fetch_quality(&self, fetched: &FetchReport) {
        if fetched.sources_attempted > 0 {
            self.quality.record(
                Stage::Fetching,
                fetched.sources_attempted as u64,
                fetched.sources_succeeded as u64,
            );
        }
    }

    fn record_extraction_quality(&self, extraction: &ExtractionReport) {
        if !extraction.results.is_empty() {
            self.quality.record(
                Stage::Extraction,
                extraction.results.len() as u64,
                extraction.successes() as u64,
            );
        }
    }

    fn geocode_events(&self, extraction: &ExtractionReport) -> (Vec<(ExtractedEvent, GeocodeResult)>, ResolutionCounts) {
        // Discard counts left over from a previous run or backfill
        self.geocoder.take_stats();

        let mut counts = ResolutionCounts::default();
        let located: Vec<_> = extraction
            .events()
            .map(|event| {
                let geocode = self
                    .geocoder
                    .resolve(&event.state, &event.lga, event.settlement.as_deref());
                counts.add(geocode.resolution);
                (event.clone(), geocode)
            })
            .collect();

        let stats = self.geocoder.take_stats();
        if stats.attempts > 0 {
            self.quality.record(Stage::Geocoding, stats.attempts, stats.successes);
        }

        (located, counts)
    }

    /// Re-resolve stored events that still lack coordinates
    pub async fn backfill_geocodes(&self, limit: usize) -> Result<BackfillReport, PipelineError> {
        backfill_geocodes(self.store.as_ref(), &self.geocoder, &self.quality, limit).await
    }
}

/// Re-resolve up to `limit` stored events that still lack coordinates.
///
/// Every examined event is marked, resolved or not, so the store serves
/// events that keep failing after the ones not yet retried. One geocoding
/// sample is recorded for the pass. Needs no fetcher or extraction backend.
pub async fn backfill_geocodes(
    store: &dyn EventStore,
    geocoder: &Geocoder,
    quality: &QualityRecorder,
    limit: usize,
) -> Result<BackfillReport, PipelineError> {
    let pending = store.query_events_missing_coordinates(limit).await?;
    let mut report = BackfillReport {
        examined: pending.len(),
        ..Default::default()
    };

    if pending.is_empty() {
        info!("No events missing coordinates");
        return Ok(report);
    }

    geocoder.take_stats();

    for stored in &pending {
        let event = &stored.event;
        let geocode = geocoder.resolve(&event.state, &event.lga, event.settlement.as_deref());
        report.resolutions.add(geocode.resolution);
        store.mark_geocode(stored.id, &geocode).await?;

        if geocode.resolution.is_resolved() {
            report.resolved += 1;
        }
    }

    let stats = geocoder.take_stats();
    quality.record(Stage::Geocoding, stats.attempts, stats.successes);
    let sample = quality.snapshot(Stage::Geocoding);
    store.record_quality_sample(&sample).await?;
    report.sample = Some(sample);

    info!(
        examined = report.examined,
        resolved = report.resolved,
        "Geocode backfill complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lookout_agents::{LlmBackend, LlmError};
    use lookout_core::{
        ArticleRef, EventId, EventType, ExtractionConfig, FetchSettings, Gazetteer,
        HealthStatus, MemoryStore, SourceKind, StoredEvent,
    };
    use lookout_net::{FetchError, Transport};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FEED_URL: &str = "https://desk.example/feed";

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Desk</title><link>https://desk.example</link><description>d</description>
<item><title>Gunmen kill 12 in Bokkos</title><link>https://desk.example/1</link><guid>desk-1</guid><description>Attack on Mushere</description></item>
<item><title>Bandits abduct traders in Maru</title><link>https://desk.example/2</link><guid>desk-2</guid><description>Kidnapping</description></item>
<item><title>Naira firms against dollar</title><link>https://desk.example/3</link><guid>desk-3</guid><description>Markets</description></item>
</channel></rss>"#;

    const RESPONSE: &str = r#"{"schema":"lookout.extract.v1","results":[
        {"id":1,"event":{"state":"Plateau","lga":"Bokkos","settlement":"Mushere","event_type":"armed_attack","actors":["gunmen"],"fatalities":12,"injuries":0,"confidence":0.92}},
        {"id":2,"event":null}]}"#;

    struct FeedTransport {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl Transport for FeedTransport {
        async fn get(&self, url: &str) -> Result<String, FetchError> {
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    struct FixedBackend {
        response: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmBackend for FixedBackend {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    /// Store whose writes always fail
    struct DownStore;

    #[async_trait]
    impl EventStore for DownStore {
        async fn append_event(&self, _event: &ExtractedEvent) -> Result<EventId, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn mark_geocode(&self, _id: EventId, _result: &GeocodeResult) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn record_quality_sample(&self, _sample: &QualitySample) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn query_events_missing_coordinates(&self, _limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// Backend that cancels the run while its call is in flight
    struct CancellingBackend {
        control: RunControl,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmBackend for CancellingBackend {
        async fn generate(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.control.cancel();
            let ids = user.matches("[[").count();
            let results: Vec<String> = (1..=ids).map(|id| format!(r#"{{"id":{},"event":null}}"#, id)).collect();
            Ok(format!(r#"{{"schema":"lookout.extract.v1","results":[{}]}}"#, results.join(",")))
        }

        fn model_name(&self) -> &str {
            "cancelling"
        }
    }

    struct Harness {
        orchestrator: PipelineOrchestrator,
        backend: Arc<FixedBackend>,
    }

    fn harness(store: SharedStore, seen_path: Option<PathBuf>) -> Harness {
        let backend = Arc::new(FixedBackend {
            response: RESPONSE.to_string(),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = PipelineOrchestrator::new(parts(
            store,
            seen_path,
            backend.clone(),
            RunControl::default(),
            3,
        ));

        Harness { orchestrator, backend }
    }

    fn parts(
        store: SharedStore,
        seen_path: Option<PathBuf>,
        backend: SharedBackend,
        control: RunControl,
        batch_size: usize,
    ) -> PipelineParts {
        let transport = Arc::new(FeedTransport {
            pages: HashMap::from([(FEED_URL.to_string(), FEED.to_string())]),
        });

        let fetcher = FeedFetcher::new(
            transport,
            Arc::new(PolitenessTracker::new(Duration::ZERO)),
            Arc::new(SeenGuidSet::new()),
            RelevanceClassifier::new(),
            FetchSettings {
                fetch_full_text: false,
                ..Default::default()
            },
        );
        let extractor = Extractor::new(
            backend,
            Arc::new(RateGate::new(10.0, 10.0)),
            ExtractionConfig {
                batch_size,
                backoff_base_ms: 1,
                ..Default::default()
            },
        );

        PipelineParts {
            fetcher,
            extractor,
            geocoder: Arc::new(Geocoder::new(Gazetteer::embedded().unwrap())),
            store,
            sources: vec![SourceConfig {
                name: "Desk".to_string(),
                tier: Tier::Fast,
                url: FEED_URL.to_string(),
                kind: SourceKind::Feed,
                active: true,
            }],
            quality: QualityThresholds::default(),
            seen_path,
            control,
        }
    }

    #[tokio::test]
    async fn test_full_run_persists_geocoded_event() {
        let store = Arc::new(MemoryStore::new());
        let h = harness(store.clone(), None);

        let report = h.orchestrator.run(Tier::Slow).await.unwrap();

        assert_eq!(h.orchestrator.state(), PipelineState::Completed);
        assert_eq!(report.articles_fetched, 3);
        assert_eq!(report.relevant_articles, 2);
        assert_eq!(report.extraction_calls, 1);
        assert_eq!(report.events_persisted, 1);
        assert_eq!(report.resolutions.settlement, 1);

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.event_type, EventType::ArmedAttack);
        let geocode = events[0].geocode.as_ref().unwrap();
        assert_eq!(geocode.resolution, Resolution::Settlement);
        assert_eq!(geocode.latitude, Some(9.2833));

        // One sample per stage with attempts
        let stages: Vec<_> = store.samples().iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec![Stage::Fetching, Stage::Extraction, Stage::Geocoding]);
        assert!(store.samples().iter().all(|s| s.status == HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_rerun_skips_seen_articles() {
        let store = Arc::new(MemoryStore::new());
        let h = harness(store.clone(), None);

        h.orchestrator.run(Tier::Slow).await.unwrap();
        let second = h.orchestrator.run(Tier::Slow).await.unwrap();

        assert_eq!(second.articles_fetched, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.events().len(), 1);
        // Only fetching recorded attempts the second time
        assert_eq!(second.samples.len(), 1);
        assert_eq!(second.samples[0].stage, Stage::Fetching);
    }

    #[tokio::test]
    async fn test_store_failure_fails_run() {
        let h = harness(Arc::new(DownStore), None);

        let result = h.orchestrator.run(Tier::Slow).await;

        assert!(matches!(result, Err(PipelineError::Persistence(_))));
        assert_eq!(h.orchestrator.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_seen_set_flushed_after_fetch() {
        let dir = std::env::temp_dir().join(format!("lookout-run-{}", uuid::Uuid::new_v4()));
        let seen_path = dir.join("seen.json");
        let h = harness(Arc::new(MemoryStore::new()), Some(seen_path.clone()));

        h.orchestrator.run(Tier::Slow).await.unwrap();

        let reloaded = SeenGuidSet::load(&seen_path).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert!(reloaded.contains("desk-1"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_cancelled_run_completes_without_work() {
        let store = Arc::new(MemoryStore::new());
        let h = harness(store.clone(), None);
        h.orchestrator.control().cancel();

        let report = h.orchestrator.run(Tier::Slow).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.state, PipelineState::Completed);
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn test_seen_set_flushed_when_cancelled_during_extraction() {
        let dir = std::env::temp_dir().join(format!("lookout-run-{}", uuid::Uuid::new_v4()));
        let seen_path = dir.join("seen.json");
        let control = RunControl::default();
        let backend = Arc::new(CancellingBackend {
            control: control.clone(),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = PipelineOrchestrator::new(parts(
            Arc::new(MemoryStore::new()),
            Some(seen_path.clone()),
            backend.clone(),
            control,
            1,
        ));

        let report = orchestrator.run(Tier::Slow).await.unwrap();

        // The in-flight batch answers; the second relevant article is never sent
        assert!(report.cancelled);
        assert_eq!(report.state, PipelineState::Completed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.relevant_articles, 2);

        let reloaded = SeenGuidSet::load(&seen_path).unwrap();
        assert_eq!(reloaded.len(), 3);
        for guid in ["desk-1", "desk-2", "desk-3"] {
            assert!(reloaded.contains(guid));
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_backfill_moves_past_unresolvable_events() {
        let store = Arc::new(MemoryStore::new());
        let resolvable = ExtractedEvent {
            article: ArticleRef {
                guid: "old-2".into(),
                url: "https://desk.example/old-2".into(),
                source: "Desk".into(),
                title: "Older story".into(),
            },
            state: "Benue".into(),
            lga: "Guma".into(),
            settlement: None,
            event_type: EventType::CommunalClash,
            actors: vec![],
            fatalities: 2,
            injuries: 0,
            confidence: 0.8,
            raw_response: String::new(),
        };
        let stranded = ExtractedEvent {
            state: "Atlantis".into(),
            ..resolvable.clone()
        };
        // The unresolvable event is older, so it heads the first window
        store.append_event(&stranded).await.unwrap();
        store.append_event(&resolvable).await.unwrap();

        let h = harness(store.clone(), None);
        let first = h.orchestrator.backfill_geocodes(1).await.unwrap();
        assert_eq!((first.examined, first.resolved), (1, 0));

        let second = h.orchestrator.backfill_geocodes(1).await.unwrap();
        assert_eq!((second.examined, second.resolved), (1, 1));

        let missing = store.query_events_missing_coordinates(10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].event.state, "Atlantis");
    }

    #[tokio::test]
    async fn test_backfill_resolves_missing_coordinates() {
        let store = Arc::new(MemoryStore::new());
        let event = ExtractedEvent {
            article: ArticleRef {
                guid: "old-1".into(),
                url: "https://desk.example/old".into(),
                source: "Desk".into(),
                title: "Old story".into(),
            },
            state: "Benue".into(),
            lga: "Guma".into(),
            settlement: None,
            event_type: EventType::CommunalClash,
            actors: vec![],
            fatalities: 4,
            injuries: 0,
            confidence: 0.8,
            raw_response: String::new(),
        };
        let stranded = ExtractedEvent {
            state: "Atlantis".into(),
            ..event.clone()
        };
        store.append_event(&event).await.unwrap();
        store.append_event(&stranded).await.unwrap();

        let h = harness(store.clone(), None);
        let report = h.orchestrator.backfill_geocodes(10).await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.resolutions.unresolved, 1);
        let sample = report.sample.unwrap();
        assert_eq!((sample.attempts, sample.successes), (2, 1));
        assert_eq!(store.query_events_missing_coordinates(10).await.unwrap().len(), 1);
        assert_eq!(store.samples().len(), 1);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_configuration() {
        let mut config = PipelineConfig::default();
        config.extraction.batch_size = 0;

        let services = PipelineServices {
            backend: Arc::new(FixedBackend {
                response: RESPONSE.to_string(),
                calls: AtomicUsize::new(0),
            }),
            transport: Arc::new(FeedTransport { pages: HashMap::new() }),
            store: Arc::new(MemoryStore::new()),
            geocoder: Arc::new(Geocoder::new(Gazetteer::embedded().unwrap())),
            seen: Arc::new(SeenGuidSet::new()),
            persist_seen: false,
        };

        assert!(matches!(
            PipelineOrchestrator::from_config(&config, services),
            Err(PipelineError::Config(_))
        ));
    }
}
