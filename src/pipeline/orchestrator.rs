use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{AlertGateway, FetchOptions, LanguageModel, PageFetcher};
use crate::clock::Clock;
use crate::config::{AppConfig, PipelineSettings};
use crate::domain::{normalize_text, CandidateRecord, CanonicalEvent, RejectionCode, Source};
use crate::error::{IngestError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::extraction::{AiExtractor, RateLimiter};
use crate::pipeline::processing::providers::{ProviderDetector, ProviderMatch};
use crate::pipeline::processing::signal::SignalDetector;
use crate::pipeline::processing::validation::{EventValidator, ValidationContext};
use crate::pipeline::processing::verification::SourceVerifier;
use crate::pipeline::storage::{Datastore, UpsertEngine, UpsertSummary};
use crate::registry::{ProviderCheck, SourceRegistry};

/// What one source produced in one run, stage by stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceRunSummary {
    pub source_id: String,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub pages_without_signal: usize,
    pub candidates: usize,
    pub verification_rejected: usize,
    pub validation_rejected: usize,
    pub accepted: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub removed: usize,
    /// Page whose listings were committed
    pub matched_url: Option<String>,
    pub provider_check: Option<ProviderCheck>,
}

impl SourceRunSummary {
    fn new(source_id: &str) -> Self {
        Self { source_id: source_id.to_string(), ..Default::default() }
    }

    fn absorb(&mut self, upsert: UpsertSummary) {
        self.inserted += upsert.inserted;
        self.duplicates += upsert.duplicates;
        self.removed += upsert.removed;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub kind: &'static str,
    pub error: String,
    pub threshold_crossed: bool,
}

#[derive(Debug, Clone)]
pub enum SourceOutcome {
    Succeeded(SourceRunSummary),
    Failed(SourceFailure),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub removed: usize,
    pub rejected: usize,
    pub sources: Vec<SourceRunSummary>,
    pub failures: Vec<SourceFailure>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            sources_total: 0,
            succeeded: 0,
            failed: 0,
            inserted: 0,
            duplicates: 0,
            removed: 0,
            rejected: 0,
            sources: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn record(&mut self, outcome: SourceOutcome) {
        match outcome {
            SourceOutcome::Succeeded(run) => {
                self.succeeded += 1;
                self.inserted += run.inserted;
                self.duplicates += run.duplicates;
                self.removed += run.removed;
                self.rejected += run.verification_rejected + run.validation_rejected;
                self.sources.push(run);
            }
            SourceOutcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }

    /// A worker that ended without a registry-recorded outcome.
    fn record_worker_failure(&mut self, source_id: String, error: &IngestError) {
        self.record(SourceOutcome::Failed(SourceFailure {
            source_id,
            kind: error.kind(),
            error: error.to_string(),
            threshold_crossed: false,
        }));
    }
}

/// URLs checked for one source, in order, without repeats.
pub fn candidate_urls(base: &str, paths: &[String]) -> Vec<String> {
    let root = base.trim_end_matches('/');
    let mut urls: Vec<String> = Vec::new();
    for path in paths {
        let url = if path.trim().is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", root, path.trim().trim_start_matches('/'))
        };
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    if urls.is_empty() {
        urls.push(base.to_string());
    }
    urls
}

fn merge_detections(into: &mut Vec<ProviderMatch>, found: Vec<ProviderMatch>) {
    for m in found {
        let seen = into.iter().any(|d| {
            d.system_key == m.system_key
                && match (&d.extracted_id, &m.extracted_id) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    (None, None) => true,
                    _ => false,
                }
        });
        if !seen {
            into.push(m);
        }
    }
    into.sort_by(|a, b| b.priority.cmp(&a.priority));
}

/// Groups accepted events by normalized venue, keeping first-seen order.
fn group_by_venue(events: Vec<CanonicalEvent>) -> Vec<(String, Vec<CanonicalEvent>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (String, Vec<CanonicalEvent>)> = HashMap::new();
    for event in events {
        let key = normalize_text(&event.venue_name);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups
            .entry(key)
            .or_insert_with(|| (event.venue_name.clone(), Vec::new()))
            .1
            .push(event);
    }
    order.into_iter().filter_map(|key| groups.remove(&key)).collect()
}

pub struct IngestPipeline {
    fetcher: Arc<dyn PageFetcher>,
    signal: SignalDetector,
    extractor: AiExtractor,
    verifier: SourceVerifier,
    validator: EventValidator,
    detector: ProviderDetector,
    upsert: UpsertEngine,
    registry: Arc<SourceRegistry>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl IngestPipeline {
    pub fn new(
        config: &AppConfig,
        fetcher: Arc<dyn PageFetcher>,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn Datastore>,
        alerts: Arc<dyn AlertGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_millis(config.extractor.min_interval_ms),
            clock.clone(),
        ));
        let registry = Arc::new(SourceRegistry::new(
            store.clone(),
            alerts,
            clock.clone(),
            config.registry.failure_threshold,
        ));

        Ok(Self {
            fetcher,
            signal: SignalDetector::new(config.signal.threshold),
            extractor: AiExtractor::new(model, limiter, config.extractor.max_page_chars)?,
            verifier: SourceVerifier::new(config.verifier.clone()),
            validator: EventValidator::new(config.validator.clone()),
            detector: ProviderDetector::default(),
            upsert: UpsertEngine::new(store),
            registry,
            clock,
            settings: config.pipeline.clone(),
        })
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    fn is_refresh_style(&self, source: &Source) -> bool {
        source.booking_system.as_deref().map_or(false, |system| {
            self.settings
                .refresh_booking_systems
                .iter()
                .any(|s| s.eq_ignore_ascii_case(system))
        })
    }

    /// Verify candidates against the page they came from. Rejections are logged and counted here.
    fn verify_candidates(
        &self,
        candidates: Vec<CandidateRecord>,
        business_name: &str,
        page_text: &str,
        summary: &mut SourceRunSummary,
    ) -> Vec<CandidateRecord> {
        let mut verified = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            if candidate.venue_name.trim().is_empty() {
                candidate.venue_name = business_name.to_string();
            }
            let result = self.verifier.verify(&candidate, page_text);
            if result.passed {
                verified.push(result.candidate);
                continue;
            }
            let code = result.primary_code().unwrap_or(RejectionCode::SourceVerificationFailed);
            let reasons: Vec<&str> = result.failed_checks.iter().map(|f| f.reason.as_str()).collect();
            info!(title = %result.candidate.title, code = code.as_str(), "Candidate rejected: {}", reasons.join("; "));
            metrics::candidates::rejected(code);
            summary.verification_rejected += 1;
        }
        verified
    }

    async fn commit(
        &self,
        source: &Source,
        today: NaiveDate,
        accepted: Vec<CanonicalEvent>,
        summary: &mut SourceRunSummary,
    ) -> Result<()> {
        if !self.is_refresh_style(source) {
            summary.absorb(self.upsert.insert_or_skip(accepted).await?);
            return Ok(());
        }
        for (venue, events) in group_by_venue(accepted) {
            summary.absorb(self.upsert.replace_schedule(&source.id, &venue, today, events).await?);
        }
        Ok(())
    }

    /// One source end to end. Errors when no page could be fetched, when every page with signal
    /// failed in the extractor, or on a fatal datastore error.
    #[instrument(skip(self, source), fields(source_id = %source.id))]
    pub async fn process_source(&self, source: &Source) -> Result<SourceRunSummary> {
        let now = self.clock.now();
        let today = now.date_naive();
        let options = FetchOptions::with_timeout(Duration::from_secs(self.settings.fetch_timeout_secs));

        let mut summary = SourceRunSummary::new(&source.id);
        let mut detections: Vec<ProviderMatch> = Vec::new();
        let mut last_error: Option<IngestError> = None;
        let mut pages_extracted = 0usize;
        let mut extraction_error: Option<IngestError> = None;
        let mut accepted: Vec<CanonicalEvent> = Vec::new();

        for url in candidate_urls(&source.url, &self.settings.candidate_paths) {
            let page = match self.fetcher.fetch(&url, &options).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(url = %url, code = e.kind(), "Page fetch failed: {}", e);
                    metrics::pages::fetch_failed(e.kind());
                    summary.pages_failed += 1;
                    last_error = Some(e);
                    continue;
                }
            };
            summary.pages_fetched += 1;
            metrics::pages::fetched();
            merge_detections(&mut detections, self.detector.detect(&page.html, &page.url));

            let signal = self.signal.assess(&page.text);
            if !signal.has_signal {
                debug!(url = %page.url, score = signal.score, "No listing signal, skipping extraction");
                metrics::pages::without_signal();
                summary.pages_without_signal += 1;
                continue;
            }

            let candidates = match self.extractor.extract(&page.text, &source.name, &page.url).await {
                Ok(candidates) => candidates,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    extraction_error = Some(e);
                    continue;
                }
            };
            pages_extracted += 1;
            summary.candidates += candidates.len();
            let verified = self.verify_candidates(candidates, &source.name, &page.text, &mut summary);
            if verified.is_empty() {
                continue;
            }

            let ctx = ValidationContext {
                source_url: page.url.clone(),
                source_id: Some(source.id.clone()),
                venue_id: None,
                booking_system: source.booking_system.clone(),
                created_at: now,
            };
            let batch = self.validator.validate_batch(&verified, &ctx, today);
            summary.validation_rejected += batch.rejected.len();
            for rejection in &batch.rejected {
                metrics::candidates::rejected(rejection.code);
            }
            if batch.accepted.is_empty() {
                continue;
            }

            metrics::candidates::accepted(batch.accepted.len());
            summary.matched_url = Some(page.url.clone());
            accepted = batch.accepted;
            // first page with accepted listings wins
            break;
        }

        if summary.pages_fetched == 0 {
            return Err(last_error.unwrap_or_else(|| IngestError::Fetch {
                url: source.url.clone(),
                message: "no candidate pages".to_string(),
            }));
        }

        summary.provider_check = Some(self.registry.check_provider(source, &detections).await?);

        // every page with signal failed in the extractor
        if pages_extracted == 0 {
            if let Some(e) = extraction_error {
                return Err(e);
            }
        }

        summary.accepted = accepted.len();
        if !accepted.is_empty() {
            self.commit(source, today, accepted, &mut summary).await?;
        }

        info!(
            pages = summary.pages_fetched,
            candidates = summary.candidates,
            accepted = summary.accepted,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "Source processed"
        );
        Ok(summary)
    }

    /// Process one source and record the outcome in the registry.
    pub async fn run_source(&self, source: &Source) -> Result<SourceOutcome> {
        match self.process_source(source).await {
            Ok(run) => {
                let item_count = u32::try_from(run.accepted).unwrap_or(u32::MAX);
                self.registry.record_success(&source.id, item_count).await?;
                Ok(SourceOutcome::Succeeded(run))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                metrics::sources::failure(e.kind());
                let message = e.to_string();
                let outcome = self.registry.record_failure(&source.id, &message).await?;
                Ok(SourceOutcome::Failed(SourceFailure {
                    source_id: source.id.clone(),
                    kind: e.kind(),
                    error: message,
                    threshold_crossed: outcome.threshold_crossed,
                }))
            }
        }
    }

    /// Run every active source in bounded batches. Only a fatal datastore error aborts the run.
    pub async fn run(self: &Arc<Self>, sources: Vec<Source>) -> Result<RunSummary> {
        let mut summary = RunSummary::new(self.clock.now());
        let active: Vec<Source> = sources.into_iter().filter(|s| s.is_active).collect();
        summary.sources_total = active.len();

        let batch_size = self.settings.batch_size.max(1);
        let batches: Vec<Vec<Source>> = active.chunks(batch_size).map(|c| c.to_vec()).collect();
        let batch_count = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        info!(run_id = %summary.run_id, sources = summary.sources_total, batches = batch_count, "Starting ingestion run");

        for (index, batch) in batches.into_iter().enumerate() {
            info!("📦 Batch {}/{} ({} sources)", index + 1, batch_count, batch.len());
            let mut workers = JoinSet::new();
            // sources whose worker has not reported back; a panicked worker never does
            let mut pending: HashSet<String> = batch.iter().map(|s| s.id.clone()).collect();

            for source in batch {
                let pipeline = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                workers.spawn(async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => pipeline.run_source(&source).await,
                        Err(e) => Err(IngestError::Worker(e.to_string())),
                    };
                    (source.id, outcome)
                });
            }

            let mut worker_errors: Vec<String> = Vec::new();
            while let Some(joined) = workers.join_next().await {
                let (source_id, outcome) = match joined {
                    Ok(reported) => reported,
                    Err(e) => {
                        error!("Source worker panicked: {}", e);
                        worker_errors.push(e.to_string());
                        continue;
                    }
                };
                pending.remove(&source_id);
                match outcome {
                    Ok(outcome) => summary.record(outcome),
                    Err(e) if e.is_fatal() => {
                        error!(source_id = %source_id, "❌ Aborting run: {}", e);
                        workers.abort_all();
                        return Err(e);
                    }
                    Err(e) => {
                        error!(source_id = %source_id, "Source worker failed: {}", e);
                        summary.record_worker_failure(source_id, &e);
                    }
                }
            }
            let mut unreported: Vec<String> = pending.into_iter().collect();
            unreported.sort();
            for source_id in unreported {
                let detail = if worker_errors.is_empty() { "no result".to_string() } else { worker_errors.join("; ") };
                summary.record_worker_failure(source_id, &IngestError::Worker(detail));
            }

            if index + 1 < batch_count {
                let pause = Duration::from_secs(self.settings.inter_batch_pause_secs);
                debug!(pause_secs = pause.as_secs(), "Pausing between batches");
                self.clock.sleep(pause).await;
            }
        }

        summary.finished_at = self.clock.now();
        info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            rejected = summary.rejected,
            "Ingestion run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candidate_urls_join_and_dedupe() {
        let urls = candidate_urls("https://acme.test/", &paths(&["", "/schedule", "classes", "schedule"]));
        assert_eq!(
            urls,
            vec!["https://acme.test/", "https://acme.test/schedule", "https://acme.test/classes"]
        );
    }

    #[test]
    fn test_candidate_urls_default_to_base() {
        assert_eq!(candidate_urls("https://acme.test", &[]), vec!["https://acme.test"]);
    }

    #[test]
    fn test_merge_detections_dedupes_and_orders() {
        let mut all = vec![ProviderMatch { system_key: "calendly".into(), extracted_id: Some("acme".into()), priority: 40 }];
        merge_detections(
            &mut all,
            vec![
                ProviderMatch { system_key: "mindbody".into(), extracted_id: Some("123".into()), priority: 100 },
                ProviderMatch { system_key: "calendly".into(), extracted_id: Some("ACME".into()), priority: 40 },
            ],
        );
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].system_key, "mindbody");
    }

    #[test]
    fn test_group_by_venue_keeps_order() {
        let event = |venue: &str| CanonicalEvent {
            id: Uuid::nil(),
            title: "Flow".into(),
            description: None,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            start_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            end_time: None,
            venue_name: venue.into(),
            venue_id: None,
            category: "yoga".into(),
            event_type: "class".into(),
            tags: vec![],
            confidence_score: 1.0,
            source_url: "https://acme.test".into(),
            source_id: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        };
        let groups = group_by_venue(vec![event("Acme West"), event("Acme East"), event("acme  west")]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Acme West");
        assert_eq!(groups[0].1.len(), 2);
    }
}
