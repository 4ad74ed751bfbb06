//! Durable catalog of scrape targets and their failure state.

pub mod source_loader;

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::ports::AlertGateway;
use crate::clock::Clock;
use crate::domain::{Source, SourceUpdate};
use crate::error::{IngestError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::providers::ProviderMatch;
use crate::pipeline::storage::Datastore;

pub use source_loader::{load_source_spec, load_sources_from_dir, SourceSpec};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureOutcome {
    pub source: Source,
    /// This failure was the one that reached the threshold
    pub threshold_crossed: bool,
    pub deactivated: bool,
    pub alert_delivered: bool,
}

/// Result of comparing a source's recorded provider with what a page shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProviderCheck {
    /// The recorded provider and identifier are still on the page
    Confirmed,
    /// The source has no recorded provider; nothing to compare
    Unknown,
    /// The recorded identifier is gone and another provider was found; the source was re-pointed
    Drifted { previous: Option<String>, current: ProviderMatch },
    /// The recorded identifier is gone and nothing replaced it; the source was flagged
    Missing,
}

pub struct SourceRegistry {
    store: Arc<dyn Datastore>,
    alerts: Arc<dyn AlertGateway>,
    clock: Arc<dyn Clock>,
    failure_threshold: u32,
}

fn slug(value: &str) -> String {
    let lowered: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    lowered
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn same_id(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

impl SourceRegistry {
    pub fn new(
        store: Arc<dyn Datastore>,
        alerts: Arc<dyn AlertGateway>,
        clock: Arc<dyn Clock>,
        failure_threshold: u32,
    ) -> Self {
        Self { store, alerts, clock, failure_threshold }
    }

    pub async fn register(&self, source: &Source) -> Result<()> {
        self.store.upsert_source(source).await?;
        info!(source_id = %source.id, verified = source.verified, "Registered source");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Source> {
        self.store
            .get_source(id)
            .await?
            .ok_or_else(|| IngestError::SourceNotFound(id.to_string()))
    }

    pub async fn all_sources(&self) -> Result<Vec<Source>> {
        self.store.list_sources().await
    }

    pub async fn active_sources(&self) -> Result<Vec<Source>> {
        Ok(self.store.list_sources().await?.into_iter().filter(|s| s.is_active).collect())
    }

    /// Import hand-curated sources. Definitions overwrite the stored ones; health state is kept.
    pub async fn import_curated(&self, sources: Vec<Source>) -> Result<usize> {
        let mut imported = 0;
        for mut source in sources {
            if let Some(existing) = self.store.get_source(&source.id).await? {
                source.consecutive_failures = existing.consecutive_failures;
                source.last_scraped = existing.last_scraped;
                source.last_scrape_success = existing.last_scrape_success;
                source.last_item_count = existing.last_item_count;
                source.last_error = existing.last_error;
                if source.notes.is_none() {
                    source.notes = existing.notes;
                }
            }
            source.verified = true;
            self.store.upsert_source(&source).await?;
            imported += 1;
        }
        info!("Imported {} curated sources", imported);
        Ok(imported)
    }

    pub async fn import_dir(&self, dir: &Path) -> Result<usize> {
        let sources = load_sources_from_dir(dir)?;
        self.import_curated(sources).await
    }

    pub async fn record_success(&self, id: &str, item_count: u32) -> Result<Source> {
        let update = SourceUpdate::RecordSuccess { at: self.clock.now(), item_count };
        let source = self.store.apply_source_update(id, &update).await?;
        metrics::sources::success();
        Ok(source)
    }

    /// Count a failure. The failure that brings the counter to exactly the threshold
    /// alerts, and deactivates the source if it was auto-discovered.
    pub async fn record_failure(&self, id: &str, error_message: &str) -> Result<FailureOutcome> {
        let update = SourceUpdate::RecordFailure { at: self.clock.now(), error: error_message.to_string() };
        let mut source = self.store.apply_source_update(id, &update).await?;
        warn!(
            source_id = id,
            consecutive_failures = source.consecutive_failures,
            "Source failed: {}",
            error_message
        );

        if source.consecutive_failures != self.failure_threshold {
            return Ok(FailureOutcome { source, threshold_crossed: false, deactivated: false, alert_delivered: false });
        }

        let mut deactivated = false;
        if !source.verified && source.is_active {
            let note = format!(
                "{}: auto-deactivated after {} consecutive failures",
                self.clock.now().format("%Y-%m-%d"),
                source.consecutive_failures
            );
            source = self.store.apply_source_update(id, &SourceUpdate::Deactivate { note }).await?;
            deactivated = true;
            metrics::sources::deactivated();
            warn!(source_id = id, "Deactivated auto-discovered source");
        }

        let message = format!(
            "⚠️ Source '{}' ({}) has failed {} times in a row{}.\nLast error: {}",
            source.name,
            source.id,
            source.consecutive_failures,
            if deactivated { " and was deactivated" } else { "" },
            error_message
        );
        let alert_delivered = self.alerts.send(&message).await;
        metrics::sources::alert_sent(alert_delivered);

        Ok(FailureOutcome { source, threshold_crossed: true, deactivated, alert_delivered })
    }

    /// Register one unverified source per provider identifier not already known.
    pub async fn discover(&self, business_name: &str, url: &str, matches: &[ProviderMatch]) -> Result<Vec<Source>> {
        let existing = self.store.list_sources().await?;
        let mut created: Vec<Source> = Vec::new();

        for m in matches {
            let Some(identifier) = m.extracted_id.as_deref() else {
                continue;
            };
            let known = existing.iter().chain(created.iter()).any(|s| {
                s.booking_system.as_deref() == Some(m.system_key.as_str()) && same_id(s.identifier.as_deref(), Some(identifier))
            });
            if known {
                continue;
            }

            let mut source = Source::new(
                &format!("{}-{}", m.system_key, slug(identifier)),
                business_name,
                url,
            )
            .with_provider(&m.system_key, identifier);
            source.priority = m.priority;
            source.verified = false;
            source.append_note(&format!("{}: discovered via {} signature", self.clock.now().format("%Y-%m-%d"), m.system_key));

            self.store.upsert_source(&source).await?;
            metrics::sources::discovered(&m.system_key);
            info!(source_id = %source.id, system = %m.system_key, "Discovered source");
            created.push(source);
        }
        Ok(created)
    }

    /// Compare the recorded provider with this run's detections and heal the record if it drifted.
    pub async fn check_provider(&self, source: &Source, matches: &[ProviderMatch]) -> Result<ProviderCheck> {
        let Some(system) = source.booking_system.as_deref() else {
            return Ok(ProviderCheck::Unknown);
        };

        let confirmed = matches.iter().any(|m| {
            m.system_key == system
                && match source.identifier.as_deref() {
                    Some(id) => same_id(m.extracted_id.as_deref(), Some(id)),
                    None => true,
                }
        });
        if confirmed {
            return Ok(ProviderCheck::Confirmed);
        }

        let recorded = format!("{}:{}", system, source.identifier.as_deref().unwrap_or("-"));
        let today = self.clock.now().format("%Y-%m-%d").to_string();
        metrics::sources::provider_drift();

        match matches.iter().find(|m| m.extracted_id.is_some()) {
            Some(current) => {
                let note = format!(
                    "{today}: provider {recorded} no longer on page, re-pointed to {}:{}",
                    current.system_key,
                    current.extracted_id.as_deref().unwrap_or("-")
                );
                warn!(source_id = %source.id, "{}", note);
                self.store
                    .apply_source_update(
                        &source.id,
                        &SourceUpdate::RepointProvider {
                            booking_system: current.system_key.clone(),
                            identifier: current.extracted_id.clone(),
                            note,
                        },
                    )
                    .await?;
                Ok(ProviderCheck::Drifted { previous: source.identifier.clone(), current: current.clone() })
            }
            None => {
                let note = format!("{today}: provider {recorded} no longer on page");
                warn!(source_id = %source.id, "{}", note);
                self.store
                    .apply_source_update(&source.id, &SourceUpdate::FlagUnverified { note })
                    .await?;
                Ok(ProviderCheck::Missing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pipeline::storage::InMemoryDatastore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

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

    fn registry(sources: Vec<Source>) -> (SourceRegistry, Arc<RecordingGateway>, Arc<InMemoryDatastore>) {
        let store = Arc::new(InMemoryDatastore::with_sources(sources));
        let alerts = Arc::new(RecordingGateway::default());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        (SourceRegistry::new(store.clone(), alerts.clone(), clock, 3), alerts, store)
    }

    fn provider(system: &str, id: Option<&str>, priority: i32) -> ProviderMatch {
        ProviderMatch { system_key: system.into(), extracted_id: id.map(str::to_string), priority }
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let (registry, _, _) = registry(vec![Source::new("acme", "Acme Yoga", "https://acme.test")]);
        registry.record_failure("acme", "timeout").await.unwrap();
        registry.record_failure("acme", "timeout").await.unwrap();
        let source = registry.record_success("acme", 7).await.unwrap();
        assert_eq!(source.consecutive_failures, 0);
        assert_eq!(source.last_item_count, Some(7));
        assert_eq!(source.last_scrape_success, Some(true));
    }

    #[tokio::test]
    async fn test_threshold_alerts_once() {
        let (registry, alerts, _) = registry(vec![Source::new("acme", "Acme Yoga", "https://acme.test")]);
        let mut crossings = 0;
        for _ in 0..5 {
            if registry.record_failure("acme", "HTTP 500").await.unwrap().threshold_crossed {
                crossings += 1;
            }
        }
        assert_eq!(crossings, 1);
        assert_eq!(alerts.sent.lock().unwrap().len(), 1);

        // curated sources stay active
        let source = registry.get("acme").await.unwrap();
        assert!(source.is_active);
        assert_eq!(source.consecutive_failures, 5);
    }

    #[tokio::test]
    async fn test_discovered_source_is_deactivated_at_threshold() {
        let mut discovered = Source::new("janeapp-acme", "Acme Physio", "https://acme.janeapp.com");
        discovered.verified = false;
        let (registry, alerts, _) = registry(vec![discovered]);

        registry.record_failure("janeapp-acme", "HTTP 404").await.unwrap();
        registry.record_failure("janeapp-acme", "HTTP 404").await.unwrap();
        let outcome = registry.record_failure("janeapp-acme", "HTTP 404").await.unwrap();

        assert!(outcome.threshold_crossed);
        assert!(outcome.deactivated);
        assert!(!outcome.source.is_active);
        assert!(alerts.sent.lock().unwrap()[0].contains("deactivated"));
    }

    #[tokio::test]
    async fn test_concurrent_failures_cross_threshold_once() {
        let (registry, alerts, _) = registry(vec![Source::new("acme", "Acme Yoga", "https://acme.test")]);
        let registry = Arc::new(registry);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.record_failure("acme", "boom").await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.get("acme").await.unwrap().consecutive_failures, 8);
        assert_eq!(alerts.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_registers_new_identifiers_only() {
        let known = Source::new("mb", "Acme Yoga", "https://acme.test").with_provider("mindbody", "12345");
        let (registry, _, store) = registry(vec![known]);
        let matches = vec![
            provider("mindbody", Some("12345"), 100),
            provider("janeapp", Some("Acme-Physio"), 90),
            provider("wellnessliving", None, 95),
        ];
        let created = registry.discover("Acme Yoga", "https://acme.test", &matches).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, "janeapp-acme-physio");
        assert!(!created[0].verified);
        assert_eq!(store.list_sources().await.unwrap().len(), 2);

        let again = registry.discover("Acme Yoga", "https://acme.test", &matches).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_provider_check_outcomes() {
        let source = Source::new("acme", "Acme Yoga", "https://acme.test").with_provider("mindbody", "12345");
        let (registry, _, _) = registry(vec![source.clone()]);

        let confirmed = registry.check_provider(&source, &[provider("mindbody", Some("12345"), 100)]).await.unwrap();
        assert_eq!(confirmed, ProviderCheck::Confirmed);

        let drifted = registry
            .check_provider(&source, &[provider("momence", Some("777"), 85)])
            .await
            .unwrap();
        assert!(matches!(drifted, ProviderCheck::Drifted { .. }));
        let healed = registry.get("acme").await.unwrap();
        assert_eq!(healed.booking_system.as_deref(), Some("momence"));
        assert_eq!(healed.identifier.as_deref(), Some("777"));
        assert!(!healed.verified);
        assert!(healed.notes.unwrap().contains("re-pointed"));
    }

    #[tokio::test]
    async fn test_provider_missing_flags_source() {
        let source = Source::new("acme", "Acme Yoga", "https://acme.test").with_provider("mindbody", "12345");
        let (registry, _, _) = registry(vec![source.clone()]);
        assert_eq!(registry.check_provider(&source, &[]).await.unwrap(), ProviderCheck::Missing);
        let flagged = registry.get("acme").await.unwrap();
        assert!(!flagged.verified);
        assert_eq!(flagged.booking_system.as_deref(), Some("mindbody"));

        let plain = Source::new("plain", "Plain", "https://plain.test");
        assert_eq!(registry.check_provider(&plain, &[]).await.unwrap(), ProviderCheck::Unknown);
    }

    #[tokio::test]
    async fn test_import_keeps_health_state() {
        let (registry, _, _) = registry(vec![Source::new("acme", "Acme Yoga", "https://acme.test")]);
        registry.record_failure("acme", "timeout").await.unwrap();

        let mut redefined = Source::new("acme", "Acme Yoga & Pilates", "https://acme.test/new");
        redefined.priority = 10;
        registry.import_curated(vec![redefined]).await.unwrap();

        let stored = registry.get("acme").await.unwrap();
        assert_eq!(stored.name, "Acme Yoga & Pilates");
        assert_eq!(stored.consecutive_failures, 1);
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));
    }
}
