use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Namespace for identity-keyed event ids, so the same listing always maps to the same id.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_4d3a_4c9b_9e2f_8a17_5d40_c3e1);

/// Lowercase and collapse all runs of whitespace to a single space.
pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-phrase occurrences of an already-lowercased `phrase` in `haystack`. Only the
/// alphanumeric ends of the phrase need a word boundary, so "drop-in" and "5k+" still match.
pub fn count_phrase(haystack: &str, phrase: &str) -> usize {
    if phrase.is_empty() {
        return 0;
    }
    haystack
        .match_indices(phrase)
        .filter(|(idx, _)| {
            let before = haystack[..*idx].chars().next_back();
            let after = haystack[idx + phrase.len()..].chars().next();
            let open_before = !phrase.starts_with(char::is_alphanumeric) || !before.map_or(false, char::is_alphanumeric);
            let open_after = !phrase.ends_with(char::is_alphanumeric) || !after.map_or(false, char::is_alphanumeric);
            open_before && open_after
        })
        .count()
}

pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    count_phrase(haystack, phrase) > 0
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// An unverified listing proposed by the extractor. Never persisted directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub date: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub time: String,
    #[serde(default, alias = "endTime")]
    pub end_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "venueName", deserialize_with = "null_as_empty")]
    pub venue_name: String,
    #[serde(default, alias = "sourceQuote", deserialize_with = "null_as_empty")]
    pub source_quote: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub confidence: f64,
}

impl CandidateRecord {
    pub fn new(title: &str, date: &str, time: &str, venue_name: &str) -> Self {
        Self {
            title: title.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            venue_name: venue_name.to_string(),
            confidence: 1.0,
            ..Default::default()
        }
    }

    pub fn with_quote(mut self, quote: &str) -> Self {
        self.source_quote = quote.to_string();
        self
    }
}

/// Per-candidate rejection codes. These are outcomes, not errors: they never unwind past the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionCode {
    MissingField,
    ForbiddenTitle,
    PlaceholderDate,
    InvalidDate,
    PastDate,
    DateTooFar,
    HolidayDateMismatch,
    InvalidTime,
    SourceVerificationFailed,
    ClusteringSuspicious,
    DuplicateSkipped,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::MissingField => "MissingField",
            RejectionCode::ForbiddenTitle => "ForbiddenTitle",
            RejectionCode::PlaceholderDate => "PlaceholderDate",
            RejectionCode::InvalidDate => "InvalidDate",
            RejectionCode::PastDate => "PastDate",
            RejectionCode::DateTooFar => "DateTooFar",
            RejectionCode::HolidayDateMismatch => "HolidayDateMismatch",
            RejectionCode::InvalidTime => "InvalidTime",
            RejectionCode::SourceVerificationFailed => "SourceVerificationFailed",
            RejectionCode::ClusteringSuspicious => "ClusteringSuspicious",
            RejectionCode::DuplicateSkipped => "DuplicateSkipped",
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed verification check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub code: RejectionCode,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub candidate: CandidateRecord,
    pub passed: bool,
    pub failed_checks: Vec<VerificationFailure>,
}

impl VerificationResult {
    /// The code reported for a failed result: the first failed check.
    pub fn primary_code(&self) -> Option<RejectionCode> {
        self.failed_checks.first().map(|f| f.code)
    }

    pub fn has_code(&self, code: RejectionCode) -> bool {
        self.failed_checks.iter().any(|f| f.code == code)
    }
}

/// Identity key of a canonical event: at most one live event per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub title: String,
    pub start_date: NaiveDate,
    pub venue_name: String,
    pub start_time: NaiveTime,
}

impl EventKey {
    pub fn new(title: &str, start_date: NaiveDate, venue_name: &str, start_time: NaiveTime) -> Self {
        Self {
            title: normalize_text(title),
            start_date,
            venue_name: normalize_text(venue_name),
            start_time,
        }
    }

    /// Deterministic id derived from the key.
    pub fn event_id(&self) -> Uuid {
        let name = format!(
            "{}|{}|{}|{}",
            self.title,
            self.start_date,
            self.venue_name,
            self.start_time.format("%H:%M:%S")
        );
        Uuid::new_v5(&EVENT_ID_NAMESPACE, name.as_bytes())
    }
}

/// The only entity this crate persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub venue_name: String,
    pub venue_id: Option<String>,
    pub category: String,
    pub event_type: String,
    pub tags: Vec<String>,
    pub confidence_score: f64,
    pub source_url: String,
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CanonicalEvent {
    pub fn key(&self) -> EventKey {
        EventKey::new(&self.title, self.start_date, &self.venue_name, self.start_time)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A scrape target and its health state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub booking_system: Option<String>,
    pub identifier: Option<String>,
    pub url: String,
    pub priority: i32,
    pub is_active: bool,
    /// Hand-curated sources are verified; discovered ones are not and may be auto-deactivated.
    pub verified: bool,
    pub consecutive_failures: u32,
    pub last_scraped: Option<DateTime<Utc>>,
    pub last_scrape_success: Option<bool>,
    pub last_item_count: Option<u32>,
    pub last_error: Option<String>,
    pub notes: Option<String>,
}

impl Source {
    pub fn new(id: &str, name: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            booking_system: None,
            identifier: None,
            url: url.to_string(),
            priority: 0,
            is_active: true,
            verified: true,
            consecutive_failures: 0,
            last_scraped: None,
            last_scrape_success: None,
            last_item_count: None,
            last_error: None,
            notes: None,
        }
    }

    pub fn with_provider(mut self, booking_system: &str, identifier: &str) -> Self {
        self.booking_system = Some(booking_system.to_string());
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn append_note(&mut self, note: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
            _ => note.to_string(),
        });
    }
}

/// Atomic mutations applied to a source by the datastore's single-writer update path.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceUpdate {
    RecordSuccess { at: DateTime<Utc>, item_count: u32 },
    RecordFailure { at: DateTime<Utc>, error: String },
    Deactivate { note: String },
    FlagUnverified { note: String },
    RepointProvider { booking_system: String, identifier: Option<String>, note: String },
}

impl SourceUpdate {
    /// Apply this update to an in-memory copy. Stores without native atomic SQL use this under their lock.
    pub fn apply(&self, source: &mut Source) {
        match self {
            SourceUpdate::RecordSuccess { at, item_count } => {
                source.last_scraped = Some(*at);
                source.last_scrape_success = Some(true);
                source.last_item_count = Some(*item_count);
                source.consecutive_failures = 0;
            }
            SourceUpdate::RecordFailure { at, error } => {
                source.last_scraped = Some(*at);
                source.last_scrape_success = Some(false);
                source.last_error = Some(error.clone());
                source.consecutive_failures += 1;
            }
            SourceUpdate::Deactivate { note } => {
                source.is_active = false;
                source.append_note(note);
            }
            SourceUpdate::FlagUnverified { note } => {
                source.verified = false;
                source.append_note(note);
            }
            SourceUpdate::RepointProvider { booking_system, identifier, note } => {
                source.booking_system = Some(booking_system.clone());
                source.identifier = identifier.clone();
                source.verified = false;
                source.append_note(note);
            }
        }
    }
}
