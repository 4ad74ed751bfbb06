use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Datastore, EventFilter};
use crate::domain::{CanonicalEvent, RejectionCode};
use crate::error::Result;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    /// Already stored, or repeated within the batch
    pub duplicates: usize,
    /// Stale rows dropped by a schedule refresh
    pub removed: usize,
}

/// Identity-keyed commit of accepted events.
pub struct UpsertEngine {
    store: Arc<dyn Datastore>,
}

/// Drops repeats of the same identity key, keeping the first.
fn dedup_batch(events: Vec<CanonicalEvent>) -> (Vec<CanonicalEvent>, usize) {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let total = events.len();
    let unique: Vec<CanonicalEvent> = events
        .into_iter()
        .filter(|e| seen.insert(e.key().event_id()))
        .collect();
    let repeats = total - unique.len();
    (unique, repeats)
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Insert events whose key is not stored yet; the rest are skipped as duplicates.
    pub async fn insert_or_skip(&self, events: Vec<CanonicalEvent>) -> Result<UpsertSummary> {
        let (unique, mut duplicates) = dedup_batch(events);
        let mut inserted = 0;

        for event in &unique {
            let key = event.key();
            let stored = match self.store.find_event(&key).await? {
                Some(_) => false,
                // a concurrent writer may have won between the check and the insert
                None => self.store.insert_event(event).await?,
            };
            if stored {
                inserted += 1;
            } else {
                duplicates += 1;
                debug!(title = %event.title, date = %event.start_date, code = RejectionCode::DuplicateSkipped.as_str(), "Duplicate skipped");
            }
        }

        metrics::catalog::inserted(inserted);
        metrics::catalog::duplicates(duplicates);
        Ok(UpsertSummary { inserted, duplicates, removed: 0 })
    }

    /// Replace a refresh-style source's upcoming schedule at one venue with `events`,
    /// atomically. Events that were already stored count as duplicates, not inserts.
    pub async fn replace_schedule(
        &self,
        source_id: &str,
        venue_name: &str,
        today: NaiveDate,
        events: Vec<CanonicalEvent>,
    ) -> Result<UpsertSummary> {
        let (unique, repeats) = dedup_batch(events);
        let filter = EventFilter::upcoming_for_source(source_id, venue_name, today);
        let outcome = self.store.replace_events(&filter, &unique).await?;

        let previous: HashSet<Uuid> = outcome.deleted_ids.iter().copied().collect();
        let current: HashSet<Uuid> = outcome.inserted_ids.iter().copied().collect();

        let inserted = current.difference(&previous).count();
        let duplicates = repeats + (unique.len() - inserted);
        let removed = previous.difference(&current).count();

        info!(
            source_id,
            venue = venue_name,
            inserted,
            duplicates,
            removed,
            "Schedule refreshed"
        );
        metrics::catalog::inserted(inserted);
        metrics::catalog::duplicates(duplicates);
        metrics::catalog::replaced(removed);
        Ok(UpsertSummary { inserted, duplicates, removed })
    }
}
