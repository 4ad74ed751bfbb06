use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{Datastore, EventFilter, ReplaceOutcome};
use crate::domain::{CanonicalEvent, EventKey, Source, SourceUpdate};
use crate::error::{IngestError, Result};

/// In-memory datastore for tests and dry runs. Locks are never held across an await.
#[derive(Default)]
pub struct InMemoryDatastore {
    events: Mutex<HashMap<Uuid, CanonicalEvent>>,
    sources: Mutex<HashMap<String, Source>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| IngestError::Datastore("in-memory store lock poisoned".into()))
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: impl IntoIterator<Item = Source>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.sources.lock() {
            map.extend(sources.into_iter().map(|s| (s.id.clone(), s)));
        }
        store
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or_default()
    }
}

fn sort_events(events: &mut [CanonicalEvent]) {
    events.sort_by(|a, b| {
        (a.start_date, a.start_time, &a.title).cmp(&(b.start_date, b.start_time, &b.title))
    });
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn insert_event(&self, event: &CanonicalEvent) -> Result<bool> {
        let mut events = lock(&self.events)?;
        let id = event.key().event_id();
        if events.contains_key(&id) {
            return Ok(false);
        }
        events.insert(id, event.clone());
        debug!("Inserted event {} ({})", event.title, id);
        Ok(true)
    }

    async fn find_event(&self, key: &EventKey) -> Result<Option<CanonicalEvent>> {
        let events = lock(&self.events)?;
        Ok(events.get(&key.event_id()).cloned())
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<CanonicalEvent>> {
        let events = lock(&self.events)?;
        let mut matched: Vec<CanonicalEvent> = events.values().filter(|e| filter.matches(e)).cloned().collect();
        sort_events(&mut matched);
        Ok(matched)
    }

    async fn delete_events(&self, filter: &EventFilter) -> Result<usize> {
        let mut events = lock(&self.events)?;
        let before = events.len();
        events.retain(|_, e| !filter.matches(e));
        Ok(before - events.len())
    }

    async fn replace_events(&self, filter: &EventFilter, new_events: &[CanonicalEvent]) -> Result<ReplaceOutcome> {
        // one guard for the whole swap, so readers never see the gap
        let mut events = lock(&self.events)?;
        let deleted_ids: Vec<Uuid> = events
            .iter()
            .filter(|(_, e)| filter.matches(e))
            .map(|(id, _)| *id)
            .collect();
        for id in &deleted_ids {
            events.remove(id);
        }

        let mut inserted_ids = Vec::new();
        for event in new_events {
            let id = event.key().event_id();
            if let std::collections::hash_map::Entry::Vacant(slot) = events.entry(id) {
                slot.insert(event.clone());
                inserted_ids.push(id);
            }
        }
        Ok(ReplaceOutcome { deleted_ids, inserted_ids })
    }

    async fn upsert_source(&self, source: &Source) -> Result<()> {
        let mut sources = lock(&self.sources)?;
        sources.insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let sources = lock(&self.sources)?;
        Ok(sources.get(id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let sources = lock(&self.sources)?;
        let mut all: Vec<Source> = sources.values().cloned().collect();
        all.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn apply_source_update(&self, id: &str, update: &SourceUpdate) -> Result<Source> {
        let mut sources = lock(&self.sources)?;
        let source = sources
            .get_mut(id)
            .ok_or_else(|| IngestError::SourceNotFound(id.to_string()))?;
        update.apply(source);
        Ok(source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use std::sync::Arc;

    fn event(title: &str, day: u32) -> CanonicalEvent {
        let start_date = NaiveDate::from_ymd_opt(2026, 3, day).unwrap();
        let start_time = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        CanonicalEvent {
            id: EventKey::new(title, start_date, "Acme Yoga", start_time).event_id(),
            title: title.into(),
            description: None,
            start_date,
            start_time,
            end_time: None,
            venue_name: "Acme Yoga".into(),
            venue_id: None,
            category: "yoga".into(),
            event_type: "class".into(),
            tags: vec![],
            confidence_score: 1.0,
            source_url: "https://acme.test".into(),
            source_id: Some("acme".into()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_keyed_on_identity() {
        let store = InMemoryDatastore::new();
        assert!(store.insert_event(&event("Sunrise Flow", 3)).await.unwrap());
        assert!(!store.insert_event(&event("sunrise  FLOW", 3)).await.unwrap());
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_swaps_matching_events() {
        let store = InMemoryDatastore::new();
        store.insert_event(&event("Sunrise Flow", 3)).await.unwrap();
        store.insert_event(&event("Old Slot", 4)).await.unwrap();

        let filter = EventFilter { source_id: Some("acme".into()), ..Default::default() };
        let outcome = store
            .replace_events(&filter, &[event("Sunrise Flow", 3), event("New Slot", 5)])
            .await
            .unwrap();
        assert_eq!(outcome.deleted_ids.len(), 2);
        assert_eq!(outcome.inserted_ids.len(), 2);

        let titles: Vec<String> = store.query_events(&filter).await.unwrap().into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["Sunrise Flow", "New Slot"]);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let store = Arc::new(InMemoryDatastore::with_sources([Source::new("acme", "Acme Yoga", "https://acme.test")]));
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_source_update("acme", &SourceUpdate::RecordFailure { at, error: "boom".into() })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let source = store.get_source("acme").await.unwrap().unwrap();
        assert_eq!(source.consecutive_failures, 20);
    }

    #[tokio::test]
    async fn test_update_unknown_source() {
        let store = InMemoryDatastore::new();
        let result = store
            .apply_source_update("missing", &SourceUpdate::Deactivate { note: "x".into() })
            .await;
        assert!(matches!(result, Err(IngestError::SourceNotFound(_))));
    }
}
