pub mod in_memory;
pub mod sqlite;
pub mod upsert;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::{normalize_text, CanonicalEvent, EventKey, Source, SourceUpdate};
use crate::error::Result;

pub use in_memory::InMemoryDatastore;
pub use sqlite::SqliteDatastore;
pub use upsert::{UpsertEngine, UpsertSummary};

/// Equality and date-range predicates over canonical events. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub source_id: Option<String>,
    /// Compared after normalization
    pub venue_name: Option<String>,
    /// Inclusive
    pub start_date_from: Option<NaiveDate>,
    /// Inclusive
    pub start_date_to: Option<NaiveDate>,
    pub tag: Option<String>,
}

impl EventFilter {
    /// Future-dated events of one source at one venue: the set a schedule refresh replaces.
    pub fn upcoming_for_source(source_id: &str, venue_name: &str, today: NaiveDate) -> Self {
        Self {
            source_id: Some(source_id.to_string()),
            venue_name: Some(venue_name.to_string()),
            start_date_from: Some(today),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        if let Some(source_id) = &self.source_id {
            if event.source_id.as_deref() != Some(source_id.as_str()) {
                return false;
            }
        }
        if let Some(venue) = &self.venue_name {
            if normalize_text(venue) != normalize_text(&event.venue_name) {
                return false;
            }
        }
        if self.start_date_from.map_or(false, |from| event.start_date < from) {
            return false;
        }
        if self.start_date_to.map_or(false, |to| event.start_date > to) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !event.has_tag(tag) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceOutcome {
    pub deleted_ids: Vec<Uuid>,
    pub inserted_ids: Vec<Uuid>,
}

/// Persistence for sources and canonical events.
///
/// Every error from an implementation is `IngestError::Datastore`, which the pipeline
/// treats as fatal.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Insert unless an event with the same identity key exists. Returns whether it was inserted.
    async fn insert_event(&self, event: &CanonicalEvent) -> Result<bool>;

    async fn find_event(&self, key: &EventKey) -> Result<Option<CanonicalEvent>>;

    /// Matching events ordered by start date and time.
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<CanonicalEvent>>;

    async fn delete_events(&self, filter: &EventFilter) -> Result<usize>;

    /// Delete everything matching `filter` and insert `events` as one atomic step.
    async fn replace_events(&self, filter: &EventFilter, events: &[CanonicalEvent]) -> Result<ReplaceOutcome>;

    async fn upsert_source(&self, source: &Source) -> Result<()>;

    async fn get_source(&self, id: &str) -> Result<Option<Source>>;

    /// All sources ordered by priority (highest first), then id.
    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Atomic read-modify-write of one source. Returns the row as stored afterwards.
    async fn apply_source_update(&self, id: &str, update: &SourceUpdate) -> Result<Source>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Utc};

    fn event(date: (i32, u32, u32)) -> CanonicalEvent {
        let start_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        let start_time = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        CanonicalEvent {
            id: EventKey::new("Sunrise Flow", start_date, "Acme Yoga", start_time).event_id(),
            title: "Sunrise Flow".into(),
            description: None,
            start_date,
            start_time,
            end_time: None,
            venue_name: "Acme Yoga".into(),
            venue_id: None,
            category: "yoga".into(),
            event_type: "class".into(),
            tags: vec!["yoga".into()],
            confidence_score: 0.9,
            source_url: "https://acme.test".into(),
            source_id: Some("acme".into()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_upcoming_filter() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let filter = EventFilter::upcoming_for_source("acme", "ACME yoga", today);
        assert!(filter.matches(&event((2026, 3, 1))));
        assert!(filter.matches(&event((2026, 9, 1))));
        assert!(!filter.matches(&event((2026, 2, 28))));

        let mut other_source = event((2026, 3, 2));
        other_source.source_id = Some("other".into());
        assert!(!filter.matches(&other_source));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(EventFilter::default().matches(&event((2020, 1, 1))));
    }

    #[test]
    fn test_tag_filter() {
        let filter = EventFilter { tag: Some("needs-time-review".into()), ..Default::default() };
        assert!(!filter.matches(&event((2026, 3, 2))));
    }
}
