use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Datastore, EventFilter, ReplaceOutcome};
use crate::domain::{normalize_text, CanonicalEvent, EventKey, Source, SourceUpdate};
use crate::error::{IngestError, Result};

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;
CREATE TABLE IF NOT EXISTS events (
    id               TEXT PRIMARY KEY,
    title            TEXT NOT NULL,
    description      TEXT,
    start_date       TEXT NOT NULL,
    start_time       TEXT NOT NULL,
    end_time         TEXT,
    venue_name       TEXT NOT NULL,
    venue_key        TEXT NOT NULL,
    venue_id         TEXT,
    category         TEXT NOT NULL,
    event_type       TEXT NOT NULL,
    tags             TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    source_url       TEXT NOT NULL,
    source_id        TEXT,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_source_venue_date ON events (source_id, venue_key, start_date);
CREATE TABLE IF NOT EXISTS sources (
    id                   TEXT PRIMARY KEY,
    name                 TEXT NOT NULL,
    booking_system       TEXT,
    identifier           TEXT,
    url                  TEXT NOT NULL,
    priority             INTEGER NOT NULL DEFAULT 0,
    is_active            INTEGER NOT NULL DEFAULT 1,
    verified             INTEGER NOT NULL DEFAULT 1,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_scraped         TEXT,
    last_scrape_success  INTEGER,
    last_item_count      INTEGER,
    last_error           TEXT,
    notes                TEXT
);
"#;

const EVENT_COLUMNS: &str = "id, title, description, start_date, start_time, end_time, venue_name, venue_id, \
     category, event_type, tags, confidence_score, source_url, source_id, created_at";

const SOURCE_COLUMNS: &str = "id, name, booking_system, identifier, url, priority, is_active, verified, \
     consecutive_failures, last_scraped, last_scrape_success, last_item_count, last_error, notes";

/// Appends `?n` to `notes`, newline-separated.
const APPEND_NOTE: &str = "notes = CASE WHEN notes IS NULL OR notes = '' THEN ?1 ELSE notes || char(10) || ?1 END";

/// SQLite-backed datastore. A single connection behind a mutex is the single writer
/// that serializes source counter updates.
pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened datastore at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Datastore("sqlite connection lock poisoned".into()))
    }
}

fn corrupt(column: &str, value: &str) -> IngestError {
    IngestError::Datastore(format!("unreadable {column} value '{value}'"))
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(column, value))
}

/// Raw row as stored; converted outside the rusqlite row callback so parse errors
/// surface as datastore errors rather than being squeezed into rusqlite's type.
struct EventRow {
    id: String,
    title: String,
    description: Option<String>,
    start_date: String,
    start_time: String,
    end_time: Option<String>,
    venue_name: String,
    venue_id: Option<String>,
    category: String,
    event_type: String,
    tags: String,
    confidence_score: f64,
    source_url: String,
    source_id: Option<String>,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            start_date: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            venue_name: row.get(6)?,
            venue_id: row.get(7)?,
            category: row.get(8)?,
            event_type: row.get(9)?,
            tags: row.get(10)?,
            confidence_score: row.get(11)?,
            source_url: row.get(12)?,
            source_id: row.get(13)?,
            created_at: row.get(14)?,
        })
    }

    fn into_event(self) -> Result<CanonicalEvent> {
        let parse_time = |column: &str, value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M:%S").map_err(|_| corrupt(column, value))
        };
        Ok(CanonicalEvent {
            id: Uuid::parse_str(&self.id).map_err(|_| corrupt("id", &self.id))?,
            start_date: NaiveDate::parse_from_str(&self.start_date, "%Y-%m-%d")
                .map_err(|_| corrupt("start_date", &self.start_date))?,
            start_time: parse_time("start_time", &self.start_time)?,
            end_time: self.end_time.as_deref().map(|t| parse_time("end_time", t)).transpose()?,
            tags: serde_json::from_str(&self.tags).map_err(|_| corrupt("tags", &self.tags))?,
            created_at: parse_ts("created_at", &self.created_at)?,
            title: self.title,
            description: self.description,
            venue_name: self.venue_name,
            venue_id: self.venue_id,
            category: self.category,
            event_type: self.event_type,
            confidence_score: self.confidence_score,
            source_url: self.source_url,
            source_id: self.source_id,
        })
    }
}

struct SourceRow {
    source: Source,
    last_scraped: Option<String>,
}

impl SourceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let source = Source {
            id: row.get(0)?,
            name: row.get(1)?,
            booking_system: row.get(2)?,
            identifier: row.get(3)?,
            url: row.get(4)?,
            priority: row.get(5)?,
            is_active: row.get(6)?,
            verified: row.get(7)?,
            consecutive_failures: row.get(8)?,
            last_scraped: None,
            last_scrape_success: row.get(10)?,
            last_item_count: row.get(11)?,
            last_error: row.get(12)?,
            notes: row.get(13)?,
        };
        Ok(Self { source, last_scraped: row.get(9)? })
    }

    fn into_source(self) -> Result<Source> {
        let mut source = self.source;
        source.last_scraped = self.last_scraped.as_deref().map(|ts| parse_ts("last_scraped", ts)).transpose()?;
        Ok(source)
    }
}

fn insert_event_tx(tx: &Transaction<'_>, event: &CanonicalEvent) -> Result<bool> {
    let id = event.key().event_id();
    let tags = serde_json::to_string(&event.tags)?;
    let changed = tx.execute(
        &format!(
            "INSERT OR IGNORE INTO events ({EVENT_COLUMNS}, venue_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            id.to_string(),
            event.title,
            event.description,
            event.start_date.format("%Y-%m-%d").to_string(),
            event.start_time.format("%H:%M:%S").to_string(),
            event.end_time.map(|t| t.format("%H:%M:%S").to_string()),
            event.venue_name,
            event.venue_id,
            event.category,
            event.event_type,
            tags,
            event.confidence_score,
            event.source_url,
            event.source_id,
            fmt_ts(&event.created_at),
            normalize_text(&event.venue_name),
        ],
    )?;
    Ok(changed == 1)
}

/// Rows matching the SQL-expressible part of the filter; tags are checked afterwards.
fn select_events(conn: &Connection, filter: &EventFilter) -> Result<Vec<CanonicalEvent>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(source_id) = &filter.source_id {
        values.push(source_id.clone());
        clauses.push(format!("source_id = ?{}", values.len()));
    }
    if let Some(venue) = &filter.venue_name {
        values.push(normalize_text(venue));
        clauses.push(format!("venue_key = ?{}", values.len()));
    }
    if let Some(from) = filter.start_date_from {
        values.push(from.format("%Y-%m-%d").to_string());
        clauses.push(format!("start_date >= ?{}", values.len()));
    }
    if let Some(to) = filter.start_date_to {
        values.push(to.format("%Y-%m-%d").to_string());
        clauses.push(format!("start_date <= ?{}", values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events {where_clause} ORDER BY start_date, start_time, title");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), EventRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let event = row.into_event()?;
        if filter.matches(&event) {
            events.push(event);
        }
    }
    Ok(events)
}

fn select_source(conn: &Connection, id: &str) -> Result<Option<Source>> {
    let row = conn
        .query_row(
            &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
            params![id],
            SourceRow::from_row,
        )
        .optional()?;
    row.map(SourceRow::into_source).transpose()
}

#[async_trait]
impl Datastore for SqliteDatastore {
    async fn insert_event(&self, event: &CanonicalEvent) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let inserted = insert_event_tx(&tx, event)?;
        tx.commit()?;
        Ok(inserted)
    }

    async fn find_event(&self, key: &EventKey) -> Result<Option<CanonicalEvent>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![key.event_id().to_string()],
                EventRow::from_row,
            )
            .optional()?;
        row.map(EventRow::into_event).transpose()
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<CanonicalEvent>> {
        let conn = self.conn()?;
        select_events(&conn, filter)
    }

    async fn delete_events(&self, filter: &EventFilter) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let doomed = select_events(&tx, filter)?;
        for event in &doomed {
            tx.execute("DELETE FROM events WHERE id = ?1", params![event.id.to_string()])?;
        }
        tx.commit()?;
        Ok(doomed.len())
    }

    async fn replace_events(&self, filter: &EventFilter, events: &[CanonicalEvent]) -> Result<ReplaceOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let doomed = select_events(&tx, filter)?;
        for event in &doomed {
            tx.execute("DELETE FROM events WHERE id = ?1", params![event.id.to_string()])?;
        }

        let mut inserted_ids = Vec::new();
        for event in events {
            if insert_event_tx(&tx, event)? {
                inserted_ids.push(event.key().event_id());
            }
        }
        // nothing is visible to other readers until here
        tx.commit()?;

        debug!(deleted = doomed.len(), inserted = inserted_ids.len(), "Replaced events");
        Ok(ReplaceOutcome {
            deleted_ids: doomed.into_iter().map(|e| e.id).collect(),
            inserted_ids,
        })
    }

    async fn upsert_source(&self, source: &Source) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO sources ({SOURCE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name, booking_system=excluded.booking_system,
                    identifier=excluded.identifier, url=excluded.url, priority=excluded.priority,
                    is_active=excluded.is_active, verified=excluded.verified,
                    consecutive_failures=excluded.consecutive_failures,
                    last_scraped=excluded.last_scraped, last_scrape_success=excluded.last_scrape_success,
                    last_item_count=excluded.last_item_count, last_error=excluded.last_error,
                    notes=excluded.notes"
            ),
            params![
                source.id,
                source.name,
                source.booking_system,
                source.identifier,
                source.url,
                source.priority,
                source.is_active,
                source.verified,
                source.consecutive_failures,
                source.last_scraped.as_ref().map(fmt_ts),
                source.last_scrape_success,
                source.last_item_count,
                source.last_error,
                source.notes,
            ],
        )?;
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;
        select_source(&conn, id)
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY priority DESC, id"))?;
        let rows = stmt
            .query_map([], SourceRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(SourceRow::into_source).collect()
    }

    async fn apply_source_update(&self, id: &str, update: &SourceUpdate) -> Result<Source> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = match update {
            SourceUpdate::RecordSuccess { at, item_count } => tx.execute(
                "UPDATE sources SET last_scraped = ?1, last_scrape_success = 1, last_item_count = ?2,
                    consecutive_failures = 0 WHERE id = ?3",
                params![fmt_ts(at), item_count, id],
            )?,
            SourceUpdate::RecordFailure { at, error } => tx.execute(
                "UPDATE sources SET last_scraped = ?1, last_scrape_success = 0, last_error = ?2,
                    consecutive_failures = consecutive_failures + 1 WHERE id = ?3",
                params![fmt_ts(at), error, id],
            )?,
            SourceUpdate::Deactivate { note } => tx.execute(
                &format!("UPDATE sources SET is_active = 0, {APPEND_NOTE} WHERE id = ?2"),
                params![note, id],
            )?,
            SourceUpdate::FlagUnverified { note } => tx.execute(
                &format!("UPDATE sources SET verified = 0, {APPEND_NOTE} WHERE id = ?2"),
                params![note, id],
            )?,
            SourceUpdate::RepointProvider { booking_system, identifier, note } => tx.execute(
                &format!(
                    "UPDATE sources SET verified = 0, booking_system = ?3, identifier = ?4, {APPEND_NOTE} WHERE id = ?2"
                ),
                params![note, id, booking_system, identifier],
            )?,
        };
        if changed == 0 {
            return Err(IngestError::SourceNotFound(id.to_string()));
        }

        let source = select_source(&tx, id)?.ok_or_else(|| IngestError::SourceNotFound(id.to_string()))?;
        tx.commit()?;
        Ok(source)
    }
}
