//! Event Extractor
//!
//! Turns relevant articles into structured incident events:
//! - Batches articles to amortize request count
//! - Passes every outbound call through the shared RateGate
//! - Retries rate-limited/transient failures with exponential backoff
//! - Retries a malformed response once with a strict schema hint
//! - Validates candidates before they leave this module

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lookout_core::{Article, EventType, ExtractedEvent, ExtractionConfig, RateGate};

use crate::schema::{build_request, parse_response, RawEvent, EXTRACTION_SYSTEM_PROMPT};
use crate::{LlmError, SharedBackend};

/// Units one extraction call withdraws from the rate gate
const CALL_COST: f64 = 1.0;

/// What happened to one article
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// A validated event ready for geocoding
    Extracted(ExtractedEvent),
    /// The model reported no incident
    NoEvent,
    /// A candidate was produced but failed validation
    Rejected(String),
    /// The batch carrying this article failed
    Failed(String),
}

impl ExtractionOutcome {
    pub fn event(&self) -> Option<&ExtractedEvent> {
        match self {
            ExtractionOutcome::Extracted(event) => Some(event),
            _ => None,
        }
    }

    /// A structured answer came back for this article
    pub fn is_success(&self) -> bool {
        !matches!(self, ExtractionOutcome::Failed(_))
    }
}

/// One article and its extraction outcome
#[derive(Debug, Clone)]
pub struct ArticleExtraction {
    pub article: Article,
    pub outcome: ExtractionOutcome,
}

/// Results of one `extract` call
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// One entry per attempted article, input order preserved
    pub results: Vec<ArticleExtraction>,
    /// External calls issued, retries included
    pub calls: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub quota_exhausted: bool,
    pub cancelled: bool,
    /// Articles without an answer because the run was cancelled
    pub unprocessed: usize,
}

impl ExtractionReport {
    pub fn events(&self) -> impl Iterator<Item = &ExtractedEvent> {
        self.results.iter().filter_map(|r| r.outcome.event())
    }

    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }
}

/// Why a whole batch failed
#[derive(Debug, Error)]
pub enum BatchFault {
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("malformed response after schema retry: {0}")]
    Schema(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("extraction failed: {0}")]
    Fatal(String),

    #[error("cancelled before the call was sent")]
    Cancelled,
}

/// Candidate validation against configured limits
pub fn validate_candidate(raw: &RawEvent, threshold: f64) -> Result<(), String> {
    if raw.state.trim().is_empty() {
        return Err("state missing".to_string());
    }
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(format!("confidence {} outside [0, 1]", raw.confidence));
    }
    if raw.confidence < threshold {
        return Err(format!("confidence {:.2} below threshold {:.2}", raw.confidence, threshold));
    }
    if raw.fatalities < 0 || raw.injuries < 0 {
        return Err(format!(
            "negative casualty count (fatalities {}, injuries {})",
            raw.fatalities, raw.injuries
        ));
    }
    if raw.fatalities > u32::MAX as i64 || raw.injuries > u32::MAX as i64 {
        return Err("casualty count out of range".to_string());
    }
    Ok(())
}

/// Batching, rate-limited event extractor
pub struct Extractor {
    backend: SharedBackend,
    gate: Arc<RateGate>,
    config: ExtractionConfig,
}

impl Extractor {
    pub fn new(backend: SharedBackend, gate: Arc<RateGate>, config: ExtractionConfig) -> Self {
        Self {
            backend,
            gate,
            config,
        }
    }

    /// Number of external calls `n` articles need without retries
    pub fn planned_calls(&self, n: usize) -> usize {
        n.div_ceil(self.config.batch_size.max(1))
    }

    /// Extract events from `articles`, one result per attempted article
    pub async fn extract(&self, articles: Vec<Article>, cancel: &CancellationToken) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        let batch_size = self.config.batch_size.max(1);
        let total = articles.len();

        info!(
            articles = total,
            batches = self.planned_calls(total),
            model = self.backend.model_name(),
            "Starting extraction"
        );

        let mut remaining = articles.into_iter().peekable();
        let mut batch_index = 0usize;

        while remaining.peek().is_some() {
            let batch: Vec<Article> = remaining.by_ref().take(batch_size).collect();

            if report.quota_exhausted {
                report.results.extend(batch.into_iter().map(|article| ArticleExtraction {
                    article,
                    outcome: ExtractionOutcome::Failed("quota exhausted".to_string()),
                }));
                continue;
            }

            if cancel.is_cancelled() {
                report.cancelled = true;
                report.unprocessed += batch.len() + remaining.len();
                break;
            }

            batch_index += 1;
            report.batches += 1;

            match self.run_batch(&batch, batch_index, &mut report.calls, cancel).await {
                Err(BatchFault::Cancelled) => {
                    info!(batch = batch_index, "Extraction cancelled while waiting");
                    report.cancelled = true;
                    report.unprocessed += batch.len() + remaining.len();
                    break;
                }
                Ok((items, raw)) => {
                    for (article, item) in batch.into_iter().zip(items) {
                        let outcome = self.judge(&article, item, &raw);
                        report.results.push(ArticleExtraction { article, outcome });
                    }
                }
                Err(fault) => {
                    warn!(batch = batch_index, size = batch.len(), error = %fault, "Batch failed");
                    report.failed_batches += 1;
                    if let BatchFault::Quota(_) = fault {
                        report.quota_exhausted = true;
                    }
                    let reason = fault.to_string();
                    report.results.extend(batch.into_iter().map(|article| ArticleExtraction {
                        article,
                        outcome: ExtractionOutcome::Failed(reason.clone()),
                    }));
                }
            }
        }

        info!(
            events = report.events().count(),
            calls = report.calls,
            failed_batches = report.failed_batches,
            quota_exhausted = report.quota_exhausted,
            "Extraction complete"
        );

        report
    }

    /// Turn one parsed slot into an outcome
    fn judge(&self, article: &Article, item: Option<RawEvent>, raw: &str) -> ExtractionOutcome {
        let Some(candidate) = item else {
            debug!(url = %article.url, "No incident reported");
            return ExtractionOutcome::NoEvent;
        };

        if let Err(reason) = validate_candidate(&candidate, self.config.confidence_threshold) {
            info!(url = %article.url, reason = %reason, "Candidate rejected");
            return ExtractionOutcome::Rejected(reason);
        }

        let settlement = candidate
            .settlement
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        ExtractionOutcome::Extracted(ExtractedEvent {
            article: article.reference(),
            state: candidate.state.trim().to_string(),
            lga: candidate.lga.trim().to_string(),
            settlement,
            event_type: EventType::from_label(&candidate.event_type),
            actors: candidate
                .actors
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            fatalities: candidate.fatalities as u32,
            injuries: candidate.injuries as u32,
            confidence: candidate.confidence,
            raw_response: raw.to_string(),
        })
    }

    /// Send one batch until it yields a well-formed response or fails
    async fn run_batch(
        &self,
        batch: &[Article],
        batch_index: usize,
        calls: &mut usize,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Option<RawEvent>>, String), BatchFault> {
        let mut attempt: u32 = 0;
        let mut strict = false;

        loop {
            self.acquire_permit(cancel).await?;
            if cancel.is_cancelled() {
                return Err(BatchFault::Cancelled);
            }
            *calls += 1;

            let request = build_request(batch, strict);
            debug!(batch = batch_index, attempt, strict, "Sending extraction request");

            let malformed = match self.backend.generate(EXTRACTION_SYSTEM_PROMPT, &request).await {
                Ok(raw) => match parse_response(&raw, batch.len()) {
                    Ok(items) => return Ok((items, raw)),
                    Err(e) => e.to_string(),
                },
                Err(LlmError::EmptyResponse) => LlmError::EmptyResponse.to_string(),
                Err(LlmError::QuotaExhausted(msg)) => return Err(BatchFault::Quota(msg)),
                Err(e) if e.is_retryable() => {
                    if attempt >= self.config.max_retries {
                        return Err(BatchFault::RetriesExhausted(e.to_string()));
                    }
                    let delay = self.backoff_delay(attempt);
                    attempt += 1;
                    warn!(
                        batch = batch_index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying batch"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(BatchFault::Cancelled),
                    }
                    continue;
                }
                Err(e) => return Err(BatchFault::Fatal(e.to_string())),
            };

            if strict {
                return Err(BatchFault::Schema(malformed));
            }
            warn!(batch = batch_index, error = %malformed, "Malformed response, retrying with schema hint");
            strict = true;
        }
    }

    /// Wait on the rate gate until one call's worth of budget is available
    async fn acquire_permit(&self, cancel: &CancellationToken) -> Result<(), BatchFault> {
        loop {
            if cancel.is_cancelled() {
                return Err(BatchFault::Cancelled);
            }
            if self.gate.try_consume(CALL_COST) {
                return Ok(());
            }

            let wait = self.gate.time_until(CALL_COST);
            if wait == Duration::MAX {
                return Err(BatchFault::Fatal("rate gate can never admit a call".to_string()));
            }
            debug!(wait_ms = wait.as_millis() as u64, "Rate gate closed, waiting");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(BatchFault::Cancelled),
            }
        }
    }

    /// base * 2^attempt plus up to half a base of jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base();
        let exp = base.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_cap = (base.as_millis() as u64) / 2;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Script = Box<dyn Fn(usize, &str) -> Result<String, LlmError> + Send + Sync>;

    /// Backend answering through a closure of (call number, user message)
    struct ScriptedBackend {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: impl Fn(usize, &str) -> Result<String, LlmError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn generate(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)(n, user)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Well-formed response with one result per [[id]] marker in the request
    fn echo_response(user: &str, event: Option<&str>) -> String {
        let ids = user.matches("[[").count();
        let results: Vec<String> = (1..=ids)
            .map(|id| format!(r#"{{"id":{},"event":{}}}"#, id, event.unwrap_or("null")))
            .collect();
        format!(r#"{{"schema":"lookout.extract.v1","results":[{}]}}"#, results.join(","))
    }

    const BOKKOS: &str = r#"{"state":"Plateau","lga":"Bokkos","settlement":"Mushere","event_type":"armed_attack","actors":["gunmen"],"fatalities":12,"injuries":3,"confidence":0.9}"#;

    fn articles(n: usize) -> Vec<Article> {
        (0..n)
            .map(|i| Article {
                url: format!("https://news.example/{}", i),
                title: format!("Story {}", i),
                summary: String::new(),
                content: "Gunmen attacked a village.".to_string(),
                source: "Example".to_string(),
                published: None,
                guid: format!("g-{}", i),
                fetch_succeeded: true,
                relevant: true,
            })
            .collect()
    }

    fn extractor(backend: Arc<ScriptedBackend>, batch_size: usize) -> Extractor {
        Extractor::new(
            backend,
            Arc::new(RateGate::new(1000.0, 1000.0)),
            ExtractionConfig {
                batch_size,
                max_retries: 2,
                backoff_base_ms: 1,
                confidence_threshold: 0.6,
            },
        )
    }

    #[tokio::test]
    async fn test_fifty_articles_in_batches_of_three() {
        let backend = ScriptedBackend::new(|_, user| Ok(echo_response(user, None)));
        let ex = extractor(backend.clone(), 3);

        assert_eq!(ex.planned_calls(50), 17);
        let report = ex.extract(articles(50), &CancellationToken::new()).await;

        assert_eq!(backend.calls(), 17);
        assert_eq!(report.calls, 17);
        assert_eq!(report.results.len(), 50);
        assert!(report.results.iter().all(|r| r.outcome == ExtractionOutcome::NoEvent));
        // Input order survives batching
        assert_eq!(report.results[49].article.guid, "g-49");
    }

    #[tokio::test]
    async fn test_extracted_event_fields() {
        let backend = ScriptedBackend::new(|_, user| Ok(echo_response(user, Some(BOKKOS))));
        let report = extractor(backend, 3).extract(articles(1), &CancellationToken::new()).await;

        let event = report.events().next().unwrap();
        assert_eq!(event.state, "Plateau");
        assert_eq!(event.settlement.as_deref(), Some("Mushere"));
        assert_eq!(event.event_type, EventType::ArmedAttack);
        assert_eq!(event.fatalities, 12);
        assert_eq!(event.article.guid, "g-0");
        assert!(event.raw_response.contains("lookout.extract.v1"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let backend = ScriptedBackend::new(|n, user| {
            if n < 2 {
                Err(LlmError::RateLimited)
            } else {
                Ok(echo_response(user, None))
            }
        });
        let report = extractor(backend.clone(), 3).extract(articles(3), &CancellationToken::new()).await;

        assert_eq!(backend.calls(), 3);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(report.successes(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_whole_batch() {
        let backend = ScriptedBackend::new(|_, _| Err(LlmError::Transient("connection reset".into())));
        let report = extractor(backend.clone(), 3).extract(articles(4), &CancellationToken::new()).await;

        // 2 batches x (1 attempt + 2 retries)
        assert_eq!(backend.calls(), 6);
        assert_eq!(report.failed_batches, 2);
        assert_eq!(report.results.len(), 4);
        assert!(report
            .results
            .iter()
            .all(|r| matches!(r.outcome, ExtractionOutcome::Failed(_))));
    }

    #[tokio::test]
    async fn test_schema_retry_uses_strict_hint() {
        let backend = ScriptedBackend::new(|n, user| {
            if n == 0 {
                Ok("Here are the incidents I found...".to_string())
            } else {
                assert!(user.contains("STRICT FORMAT"));
                Ok(echo_response(user, None))
            }
        });
        let report = extractor(backend.clone(), 3).extract(articles(2), &CancellationToken::new()).await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(report.successes(), 2);
    }

    #[tokio::test]
    async fn test_repeated_malformance_fails_batch() {
        let backend = ScriptedBackend::new(|_, _| Ok(r#"{"schema":"lookout.extract.v1","results":[]}"#.to_string()));
        let report = extractor(backend.clone(), 3).extract(articles(2), &CancellationToken::new()).await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.successes(), 0);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_stops_extraction() {
        let backend = ScriptedBackend::new(|n, user| {
            if n == 0 {
                Ok(echo_response(user, Some(BOKKOS)))
            } else {
                Err(LlmError::QuotaExhausted("insufficient_quota".into()))
            }
        });
        let report = extractor(backend.clone(), 2).extract(articles(6), &CancellationToken::new()).await;

        assert_eq!(backend.calls(), 2);
        assert!(report.quota_exhausted);
        assert_eq!(report.events().count(), 2);
        assert_eq!(report.results.len(), 6);
        assert_eq!(report.successes(), 2);
    }

    #[tokio::test]
    async fn test_validation_rejects_low_confidence_and_negative_counts() {
        let low = r#"{"state":"Benue","lga":"Guma","event_type":"banditry","actors":[],"fatalities":1,"injuries":0,"confidence":0.3}"#;
        let negative = r#"{"state":"Benue","lga":"Guma","event_type":"banditry","actors":[],"fatalities":-1,"injuries":0,"confidence":0.9}"#;
        let stateless = r#"{"state":" ","lga":"Guma","event_type":"banditry","actors":[],"fatalities":1,"injuries":0,"confidence":0.9}"#;

        for candidate in [low, negative, stateless] {
            let candidate = candidate.to_string();
            let backend = ScriptedBackend::new(move |_, user| Ok(echo_response(user, Some(&candidate))));
            let report = extractor(backend, 3).extract(articles(1), &CancellationToken::new()).await;
            assert!(matches!(report.results[0].outcome, ExtractionOutcome::Rejected(_)));
            assert_eq!(report.events().count(), 0);
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_batches() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let backend = ScriptedBackend::new(move |_, user| {
            trigger.cancel();
            Ok(echo_response(user, None))
        });
        let report = extractor(backend.clone(), 2).extract(articles(6), &cancel).await;

        // The in-flight batch finishes; nothing new is sent
        assert_eq!(backend.calls(), 1);
        assert!(report.cancelled);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.unprocessed, 4);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_rate_gate_wait() {
        let backend = ScriptedBackend::new(|_, user| Ok(echo_response(user, None)));
        // One permit, then a ten second refill
        let ex = Extractor::new(
            backend.clone(),
            Arc::new(RateGate::new(1.0, 0.1)),
            ExtractionConfig {
                batch_size: 1,
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = ex.extract(articles(2), &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backend.calls(), 1);
        assert_eq!(report.calls, 1);
        assert!(report.cancelled);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.unprocessed, 1);
        assert_eq!(report.failed_batches, 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_retry_backoff() {
        let backend = ScriptedBackend::new(|_, _| Err(LlmError::RateLimited));
        let ex = Extractor::new(
            backend.clone(),
            Arc::new(RateGate::new(1000.0, 1000.0)),
            ExtractionConfig {
                batch_size: 2,
                max_retries: 3,
                backoff_base_ms: 10_000,
                confidence_threshold: 0.6,
            },
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = ex.extract(articles(4), &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backend.calls(), 1);
        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert_eq!(report.unprocessed, 4);
    }

    #[tokio::test]
    async fn test_rate_gate_is_consulted() {
        let gate = Arc::new(RateGate::new(2.0, 1000.0));
        let backend = ScriptedBackend::new(|_, user| Ok(echo_response(user, None)));
        let ex = Extractor::new(backend.clone(), gate.clone(), ExtractionConfig::default());

        ex.extract(articles(9), &CancellationToken::new()).await;
        assert_eq!(backend.calls(), 3);
        assert!(gate.level() <= gate.capacity());
    }

    #[test]
    fn test_backoff_doubles() {
        let backend = ScriptedBackend::new(|_, _| Err(LlmError::RateLimited));
        let ex = Extractor::new(
            backend,
            Arc::new(RateGate::new(5.0, 0.1)),
            ExtractionConfig {
                backoff_base_ms: 100,
                ..Default::default()
            },
        );

        let first = ex.backoff_delay(0);
        let third = ex.backoff_delay(2);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(450));
    }
}
