use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use listing_ingest::app::ports::{AlertGateway, FetchOptions, FetchedPage, LanguageModel, PageFetcher};
use listing_ingest::clock::{Clock, ManualClock};
use listing_ingest::config::AppConfig;
use listing_ingest::domain::Source;
use listing_ingest::error::{IngestError, Result};
use listing_ingest::health::{HealthMonitor, IssueType, Severity};
use listing_ingest::infra::http_client::html_to_text;
use listing_ingest::pipeline::storage::{Datastore, EventFilter, InMemoryDatastore};
use listing_ingest::pipeline::IngestPipeline;
use listing_ingest::registry::ProviderCheck;

#[derive(Default)]
struct StaticSite {
    pages: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
}

impl StaticSite {
    fn serve(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), html.to_string());
    }
}

#[async_trait]
impl PageFetcher for StaticSite {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<FetchedPage> {
        self.requests.lock().unwrap().push(url.to_string());
        if url.starts_with("https://crash.test") {
            panic!("fetcher bug on {url}");
        }
        match self.pages.lock().unwrap().get(url) {
            Some(html) => Ok(FetchedPage { url: url.to_string(), html: html.clone(), text: html_to_text(html) }),
            None => Err(IngestError::Fetch { url: url.to_string(), message: "HTTP 404".into() }),
        }
    }
}

/// Returns whatever JSON it was last given, or an API error.
#[derive(Default)]
struct ScriptedModel {
    reply: Mutex<Option<String>>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    fn reply_with(&self, events: serde_json::Value) {
        *self.reply.lock().unwrap() = Some(json!({ "events": events }).to_string());
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn extract(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| IngestError::AiExtraction("HTTP 503 from model".into()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl AlertGateway for RecordingGateway {
    async fn send(&self, message: &str) -> bool {
        self.sent.lock().unwrap().push(message.to_string());
        true
    }
}

struct Harness {
    pipeline: Arc<IngestPipeline>,
    site: Arc<StaticSite>,
    model: Arc<ScriptedModel>,
    store: Arc<InMemoryDatastore>,
    alerts: Arc<RecordingGateway>,
    clock: Arc<ManualClock>,
}

fn harness(sources: Vec<Source>) -> Harness {
    let mut config = AppConfig::default();
    config.extractor.min_interval_ms = 0;
    config.pipeline.batch_size = 2;
    config.pipeline.inter_batch_pause_secs = 30;

    let site = Arc::new(StaticSite::default());
    let model = Arc::new(ScriptedModel::default());
    let store = Arc::new(InMemoryDatastore::with_sources(sources));
    let alerts = Arc::new(RecordingGateway::default());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));

    let pipeline = IngestPipeline::new(
        &config,
        site.clone(),
        model.clone(),
        store.clone(),
        alerts.clone(),
        clock.clone(),
    )
    .unwrap();

    Harness { pipeline: Arc::new(pipeline), site, model, store, alerts, clock }
}

fn acme() -> Source {
    Source::new("acme", "Acme Yoga", "https://acme.test")
}

fn listing(title: &str, date: &str, time: &str, quote: &str) -> serde_json::Value {
    json!({
        "title": title,
        "date": date,
        "time": time,
        "venue_name": "Acme Yoga",
        "source_quote": quote,
        "confidence": 0.9
    })
}

#[tokio::test]
async fn test_grounded_listing_is_inserted() {
    let h = harness(vec![acme()]);
    h.site.serve("https://acme.test", "<p>Sunrise Flow — Tuesdays 7:00 AM with Jane</p>");
    h.model.reply_with(json!([listing("Sunrise Flow", "2026-03-03", "07:00", "Sunrise Flow — Tuesdays 7:00 AM")]));

    let run = h.pipeline.process_source(&acme()).await.unwrap();
    assert_eq!(run.accepted, 1);
    assert_eq!(run.inserted, 1);
    assert_eq!(run.matched_url.as_deref(), Some("https://acme.test"));

    let events = h.store.query_events(&EventFilter::default()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "Sunrise Flow");
    assert_eq!(events[0].source_id.as_deref(), Some("acme"));

    // first page yielded listings, so the other candidate paths were never requested
    assert_eq!(h.site.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_title_equal_to_venue_is_rejected() {
    let h = harness(vec![acme()]);
    h.site.serve("https://acme.test", "<h1>Acme Yoga</h1><p>Tuesdays 7:00 AM</p>");
    h.model.reply_with(json!([listing("Acme Yoga", "2026-03-03", "07:00", "Acme Yoga")]));

    let run = h.pipeline.process_source(&acme()).await.unwrap();
    assert_eq!(run.verification_rejected, 1);
    assert_eq!(run.inserted, 0);
    assert_eq!(h.store.event_count(), 0);
}

#[tokio::test]
async fn test_holiday_outside_window_is_rejected() {
    let h = harness(vec![acme()]);
    h.site.serve("https://acme.test", "<p>Christmas Market — Saturday July 4 at 7:00 PM</p>");
    h.model.reply_with(json!([listing("Christmas Market", "2026-07-04", "19:00", "Christmas Market")]));

    let run = h.pipeline.process_source(&acme()).await.unwrap();
    assert_eq!(run.verification_rejected, 0);
    assert_eq!(run.validation_rejected, 1);
    assert_eq!(h.store.event_count(), 0);
}

#[tokio::test]
async fn test_rerun_on_unchanged_page_adds_nothing() {
    let h = harness(vec![acme()]);
    h.site.serve("https://acme.test", "<p>Sunrise Flow — Tuesdays 7:00 AM with Jane</p>");
    h.model.reply_with(json!([listing("Sunrise Flow", "2026-03-03", "07:00", "Sunrise Flow — Tuesdays 7:00 AM")]));

    let first = h.pipeline.run(vec![acme()]).await.unwrap();
    let second = h.pipeline.run(vec![acme()]).await.unwrap();

    assert_eq!(first.inserted, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(h.store.event_count(), 1);
}

#[tokio::test]
async fn test_repeated_slot_is_dropped_as_cluster() {
    let h = harness(vec![acme()]);
    h.site.serve(
        "https://acme.test",
        "<p>Saturday 2026-03-07 10:00: Vinyasa Flow, Yin Flow, Power Hour, Slow Burn, Deep Stretch</p>",
    );
    let titles = ["Vinyasa Flow", "Yin Flow", "Power Hour", "Slow Burn", "Deep Stretch"];
    h.model.reply_with(json!(titles
        .iter()
        .map(|t| listing(t, "2026-03-07", "10:00", t))
        .collect::<Vec<_>>()));

    let run = h.pipeline.process_source(&acme()).await.unwrap();
    assert_eq!(run.candidates, 5);
    assert_eq!(run.validation_rejected, 5);
    assert_eq!(run.inserted, 0);
    assert_eq!(h.store.event_count(), 0);
}

#[tokio::test]
async fn test_unreachable_source_alerts_once_and_turns_high() {
    let dead = Source::new("dead", "Dead Studio", "https://dead.test");
    let h = harness(vec![dead.clone()]);

    for _ in 0..4 {
        let summary = h.pipeline.run(vec![dead.clone()]).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].kind, "FetchError");
    }
    assert_eq!(h.alerts.sent.lock().unwrap().len(), 1);

    let stored = h.store.get_source("dead").await.unwrap().unwrap();
    assert_eq!(stored.consecutive_failures, 4);
    assert_eq!(stored.last_scrape_success, Some(false));
    // hand-curated sources are never auto-deactivated
    assert!(stored.is_active);

    let report = HealthMonitor::new(3, 48, 24).check(h.store.as_ref(), h.clock.now()).await.unwrap();
    assert!(report.has_high());
    assert_eq!(report.issues[0].issue_type, IssueType::ConsecutiveFailures);
}

#[tokio::test]
async fn test_extractor_outage_is_charged_to_the_source() {
    let h = harness(vec![acme()]);
    h.site.serve("https://acme.test", "<p>Sunrise Flow — Tuesdays 7:00 AM with Jane</p>");
    for _ in 0..2 {
        h.pipeline.registry().record_failure("acme", "timeout").await.unwrap();
    }

    let summary = h.pipeline.run(vec![acme()]).await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].kind, "AIExtractionError");
    assert!(summary.failures[0].threshold_crossed);
    assert_eq!(h.model.calls(), 1);

    let stored = h.store.get_source("acme").await.unwrap().unwrap();
    assert_eq!(stored.consecutive_failures, 3);
    assert_eq!(stored.last_scrape_success, Some(false));
    assert!(stored.last_error.as_deref().unwrap_or_default().contains("HTTP 503"));
    assert_eq!(h.alerts.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_extraction_is_a_silent_success() {
    let h = harness(vec![acme()]);
    h.site.serve("https://acme.test", "<p>Sunrise Flow — Tuesdays 7:00 AM with Jane</p>");
    h.model.reply_with(json!([]));

    let summary = h.pipeline.run(vec![acme()]).await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let stored = h.store.get_source("acme").await.unwrap().unwrap();
    assert_eq!(stored.last_item_count, Some(0));
    let report = HealthMonitor::new(3, 48, 24).sweep(&[stored], h.clock.now());
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].severity, Severity::Medium);
    assert_eq!(report.issues[0].issue_type, IssueType::SilentFailure);
}

#[tokio::test]
async fn test_page_without_signal_skips_extraction() {
    let h = harness(vec![acme()]);
    h.site.serve("https://acme.test", "<p>About our community and philosophy.</p>");
    h.model.reply_with(json!([]));

    let run = h.pipeline.process_source(&acme()).await.unwrap();
    assert_eq!(run.pages_without_signal, 1);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn test_schedule_refresh_replaces_moved_slots() {
    let source = acme().with_provider("mindbody", "12345");
    let h = harness(vec![source.clone()]);
    h.site.serve(
        "https://acme.test",
        r#"<p>Sunrise Flow Tuesday 7:00 AM. Yin Flow Wednesday 6:00 PM.</p>
           <a href="https://clients.mindbodyonline.com/classic/ws?studioid=12345">Book</a>"#,
    );

    h.model.reply_with(json!([
        listing("Sunrise Flow", "2026-03-03", "07:00", "Sunrise Flow Tuesday 7:00 AM"),
        listing("Yin Flow", "2026-03-04", "18:00", "Yin Flow Wednesday 6:00 PM"),
    ]));
    let first = h.pipeline.process_source(&source).await.unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.provider_check, Some(ProviderCheck::Confirmed));

    h.model.reply_with(json!([
        listing("Sunrise Flow", "2026-03-03", "07:00", "Sunrise Flow Tuesday 7:00 AM"),
        listing("Yin Flow", "2026-03-04", "19:00", "Yin Flow Wednesday 6:00 PM"),
    ]));
    let second = h.pipeline.process_source(&source).await.unwrap();
    assert_eq!((second.inserted, second.duplicates, second.removed), (1, 1, 1));
    assert_eq!(h.store.event_count(), 2);
}

#[tokio::test]
async fn test_batches_pause_between_each_other() {
    let sources: Vec<Source> = ["a", "b", "c"]
        .iter()
        .map(|id| Source::new(id, &format!("Studio {id}"), &format!("https://{id}.test")))
        .collect();
    let h = harness(sources.clone());
    for s in &sources {
        h.site.serve(&s.url, "<p>Nothing scheduled yet</p>");
    }

    let summary = h.pipeline.run(sources).await.unwrap();
    assert_eq!(summary.sources_total, 3);
    assert_eq!(summary.succeeded, 3);
    // batch size 2: one pause between the two batches
    assert_eq!(h.clock.total_slept(), std::time::Duration::from_secs(30));
}

#[tokio::test]
async fn test_inactive_sources_are_skipped() {
    let mut paused = acme();
    paused.is_active = false;
    let h = harness(vec![paused.clone()]);

    let summary = h.pipeline.run(vec![paused]).await.unwrap();
    assert_eq!(summary.sources_total, 0);
    assert!(h.site.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_crashed_worker_is_reported_under_its_source() {
    let crash = Source::new("crash", "Crash Studio", "https://crash.test");
    let h = harness(vec![acme(), crash.clone()]);
    h.site.serve("https://acme.test", "<p>About our community and philosophy.</p>");

    let summary = h.pipeline.run(vec![acme(), crash]).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].source_id, "crash");
    assert_eq!(summary.failures[0].kind, "worker");
}
