//! Business rules turning verified candidates into canonical events.

pub mod categorize;
pub mod holidays;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::ValidatorSettings;
use crate::constants::NEEDS_TIME_REVIEW_TAG;
use crate::domain::{normalize_text, CandidateRecord, CanonicalEvent, EventKey, RejectionCode};

pub use categorize::categorize;
pub use holidays::{holiday_for_title, DateWindow, Holiday, HOLIDAYS};

static TIME_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}(?::\d{2})?$").expect("time format pattern"));

/// Where accepted events came from. Copied onto every event the validator builds.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub source_url: String,
    pub source_id: Option<String>,
    pub venue_id: Option<String>,
    pub booking_system: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ValidationContext {
    pub fn new(source_url: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            source_url: source_url.to_string(),
            source_id: None,
            venue_id: None,
            booking_system: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted(CanonicalEvent),
    Rejected { code: RejectionCode, message: String },
}

impl ValidationOutcome {
    fn rejected(code: RejectionCode, message: impl Into<String>) -> Self {
        ValidationOutcome::Rejected { code, message: message.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub title: String,
    pub code: RejectionCode,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchValidation {
    pub accepted: Vec<CanonicalEvent>,
    pub rejected: Vec<Rejection>,
}

impl BatchValidation {
    pub fn count(&self, code: RejectionCode) -> usize {
        self.rejected.iter().filter(|r| r.code == code).count()
    }
}

pub struct EventValidator {
    settings: ValidatorSettings,
    placeholder_dates: HashSet<NaiveDate>,
    placeholder_times: HashSet<NaiveTime>,
}

impl Default for EventValidator {
    fn default() -> Self {
        Self::new(ValidatorSettings::default())
    }
}

impl EventValidator {
    pub fn new(settings: ValidatorSettings) -> Self {
        let placeholder_dates = settings
            .placeholder_dates
            .iter()
            .filter_map(|d| match NaiveDate::parse_from_str(d, "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(_) => {
                    warn!("Ignoring unparseable placeholder date '{}'", d);
                    None
                }
            })
            .collect();
        let placeholder_times = settings
            .placeholder_times
            .iter()
            .filter_map(|t| match parse_time(t) {
                Some(time) => Some(time),
                None => {
                    warn!("Ignoring unparseable placeholder time '{}'", t);
                    None
                }
            })
            .collect();

        Self { settings, placeholder_dates, placeholder_times }
    }

    /// Validate a single verified candidate against `today`.
    pub fn validate(&self, candidate: &CandidateRecord, ctx: &ValidationContext, today: NaiveDate) -> ValidationOutcome {
        let title = candidate.title.trim();
        let venue_name = candidate.venue_name.trim();

        let missing: Vec<&str> = [
            ("title", title),
            ("date", candidate.date.trim()),
            ("time", candidate.time.trim()),
            ("venue_name", venue_name),
        ]
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| *field)
        .collect();
        if !missing.is_empty() {
            return ValidationOutcome::rejected(
                RejectionCode::MissingField,
                format!("missing required field(s): {}", missing.join(", ")),
            );
        }

        let start_date = match NaiveDate::parse_from_str(candidate.date.trim(), "%Y-%m-%d") {
            Ok(date) => date,
            Err(e) => {
                return ValidationOutcome::rejected(
                    RejectionCode::InvalidDate,
                    format!("unparseable date '{}': {}", candidate.date, e),
                )
            }
        };
        if self.placeholder_dates.contains(&start_date) {
            return ValidationOutcome::rejected(
                RejectionCode::PlaceholderDate,
                format!("{start_date} is a known placeholder date"),
            );
        }
        let earliest = today - Duration::days(1);
        // calendar months, so two years out lands on the same day across a Feb 29
        let latest = today
            .checked_add_months(Months::new(self.settings.max_future_months))
            .unwrap_or(NaiveDate::MAX);
        if start_date < earliest {
            return ValidationOutcome::rejected(
                RejectionCode::PastDate,
                format!("{start_date} is before {earliest}"),
            );
        }
        if start_date > latest {
            return ValidationOutcome::rejected(
                RejectionCode::DateTooFar,
                format!("{start_date} is after {latest}"),
            );
        }

        if let Some(holiday) = holiday_for_title(title) {
            if !holiday.window.contains(start_date) {
                return ValidationOutcome::rejected(
                    RejectionCode::HolidayDateMismatch,
                    format!("title mentions {} but date is {}", holiday.name, start_date),
                );
            }
        }

        let time_str = candidate.time.trim();
        let start_time = match TIME_FORMAT.is_match(time_str).then(|| parse_time(time_str)).flatten() {
            Some(time) => time,
            None => {
                return ValidationOutcome::rejected(
                    RejectionCode::InvalidTime,
                    format!("time '{}' is not HH:MM[:SS]", candidate.time),
                )
            }
        };

        let end_time = candidate.end_time.as_deref().map(str::trim).filter(|s| !s.is_empty()).and_then(|s| {
            let parsed = TIME_FORMAT.is_match(s).then(|| parse_time(s)).flatten();
            if parsed.is_none() {
                debug!(title, end_time = s, "Dropping unparseable end time");
            }
            parsed
        });

        let description = candidate
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let (category, event_type) = categorize(title, description.as_deref());
        let mut tags = vec![category.to_string()];
        if self.placeholder_times.contains(&start_time) {
            tags.push(NEEDS_TIME_REVIEW_TAG.to_string());
        }
        if let Some(bs) = ctx.booking_system.as_deref().filter(|bs| !bs.is_empty()) {
            tags.push(format!("provider:{bs}"));
        }

        let key = EventKey::new(title, start_date, venue_name, start_time);
        ValidationOutcome::Accepted(CanonicalEvent {
            id: key.event_id(),
            title: title.to_string(),
            description,
            start_date,
            start_time,
            end_time,
            venue_name: venue_name.to_string(),
            venue_id: ctx.venue_id.clone(),
            category: category.to_string(),
            event_type: event_type.to_string(),
            tags,
            confidence_score: candidate.confidence.clamp(0.0, 1.0),
            source_url: ctx.source_url.clone(),
            source_id: ctx.source_id.clone(),
            created_at: ctx.created_at,
        })
    }

    /// Validate every candidate, then drop whole (date, time, venue) groups that
    /// are too large to be a real schedule.
    pub fn validate_batch(
        &self,
        candidates: &[CandidateRecord],
        ctx: &ValidationContext,
        today: NaiveDate,
    ) -> BatchValidation {
        let mut result = BatchValidation::default();
        let mut drafts = Vec::new();

        for candidate in candidates {
            match self.validate(candidate, ctx, today) {
                ValidationOutcome::Accepted(event) => drafts.push(event),
                ValidationOutcome::Rejected { code, message } => {
                    info!(title = %candidate.title, code = code.as_str(), "Candidate rejected: {}", message);
                    result.rejected.push(Rejection { title: candidate.title.clone(), code, message });
                }
            }
        }

        let mut slot_sizes: HashMap<(NaiveDate, NaiveTime, String), usize> = HashMap::new();
        for event in &drafts {
            *slot_sizes
                .entry((event.start_date, event.start_time, normalize_text(&event.venue_name)))
                .or_default() += 1;
        }

        for event in drafts {
            let slot = (event.start_date, event.start_time, normalize_text(&event.venue_name));
            let size = slot_sizes.get(&slot).copied().unwrap_or_default();
            if size > self.settings.cluster_threshold {
                let message = format!(
                    "{} listings share {} {} at {}",
                    size, event.start_date, event.start_time, event.venue_name
                );
                info!(title = %event.title, code = RejectionCode::ClusteringSuspicious.as_str(), "Candidate rejected: {}", message);
                result.rejected.push(Rejection {
                    title: event.title,
                    code: RejectionCode::ClusteringSuspicious,
                    message,
                });
            } else {
                result.accepted.push(event);
            }
        }

        result
    }
}

/// Parses `H:MM`, `HH:MM` or `HH:MM:SS` into a time of day.
fn parse_time(value: &str) -> Option<NaiveTime> {
    let mut parts = value.trim().split(':').map(|p| p.parse::<u32>());
    let hour = parts.next()?.ok()?;
    let minute = parts.next()?.ok()?;
    let second = match parts.next() {
        Some(s) => s.ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn ctx() -> ValidationContext {
        let mut ctx = ValidationContext::new(
            "https://acme.test/schedule",
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        );
        ctx.source_id = Some("acme".into());
        ctx.booking_system = Some("mindbody".into());
        ctx
    }

    fn rejected_code(outcome: ValidationOutcome) -> RejectionCode {
        match outcome {
            ValidationOutcome::Rejected { code, .. } => code,
            ValidationOutcome::Accepted(event) => panic!("expected rejection, got {event:?}"),
        }
    }

    #[test]
    fn test_accepts_well_formed_candidate() {
        let candidate = CandidateRecord::new("Sunrise Flow", "2026-03-03", "7:00", "Acme Yoga");
        let ValidationOutcome::Accepted(event) = EventValidator::default().validate(&candidate, &ctx(), today()) else {
            panic!("expected acceptance");
        };
        assert_eq!(event.start_time, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(event.category, "yoga");
        assert_eq!(event.event_type, "class");
        assert_eq!(event.tags, vec!["yoga".to_string(), "provider:mindbody".to_string()]);
        assert_eq!(event.source_id.as_deref(), Some("acme"));
        assert_eq!(event.id, event.key().event_id());
    }

    #[test]
    fn test_missing_fields() {
        let candidate = CandidateRecord::new("Sunrise Flow", "2026-03-03", "", "");
        let outcome = EventValidator::default().validate(&candidate, &ctx(), today());
        let ValidationOutcome::Rejected { code, message } = outcome else { panic!() };
        assert_eq!(code, RejectionCode::MissingField);
        assert!(message.contains("time") && message.contains("venue_name"));
    }

    #[test]
    fn test_date_rules() {
        let v = EventValidator::default();
        let check = |date: &str| rejected_code(v.validate(&CandidateRecord::new("Sunrise Flow", date, "07:00", "Acme Yoga"), &ctx(), today()));
        assert_eq!(check("next tuesday"), RejectionCode::InvalidDate);
        assert_eq!(check("2026-02-30"), RejectionCode::InvalidDate);
        assert_eq!(check("2099-12-31"), RejectionCode::PlaceholderDate);
        assert_eq!(check("2026-02-27"), RejectionCode::PastDate);
        assert_eq!(check("2028-03-02"), RejectionCode::DateTooFar);
    }

    #[test]
    fn test_two_years_out_is_inclusive_across_leap_day() {
        let v = EventValidator::default();
        let candidate = CandidateRecord::new("Sunrise Flow", "2028-03-01", "07:00", "Acme Yoga");
        assert!(matches!(v.validate(&candidate, &ctx(), today()), ValidationOutcome::Accepted(_)));

        let from_leap_day = NaiveDate::from_ymd_opt(2028, 2, 29).unwrap();
        let clamped = CandidateRecord::new("Sunrise Flow", "2030-02-28", "07:00", "Acme Yoga");
        assert!(matches!(v.validate(&clamped, &ctx(), from_leap_day), ValidationOutcome::Accepted(_)));
        let beyond = CandidateRecord::new("Sunrise Flow", "2030-03-01", "07:00", "Acme Yoga");
        assert_eq!(rejected_code(v.validate(&beyond, &ctx(), from_leap_day)), RejectionCode::DateTooFar);
    }

    #[test]
    fn test_yesterday_is_still_accepted() {
        let candidate = CandidateRecord::new("Sunrise Flow", "2026-02-28", "07:00", "Acme Yoga");
        assert!(matches!(
            EventValidator::default().validate(&candidate, &ctx(), today()),
            ValidationOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_holiday_rules() {
        let v = EventValidator::default();
        let christmas = CandidateRecord::new("Christmas Market", "2026-07-04", "10:00", "Acme Yoga");
        assert_eq!(rejected_code(v.validate(&christmas, &ctx(), today())), RejectionCode::HolidayDateMismatch);

        let canada_wrong = CandidateRecord::new("Canada Day Flow", "2026-07-02", "10:00", "Acme Yoga");
        assert_eq!(rejected_code(v.validate(&canada_wrong, &ctx(), today())), RejectionCode::HolidayDateMismatch);

        let canada_right = CandidateRecord::new("Canada Day Flow", "2026-07-01", "10:00", "Acme Yoga");
        assert!(matches!(v.validate(&canada_right, &ctx(), today()), ValidationOutcome::Accepted(_)));

        let halloween = CandidateRecord::new("Halloween Dance Party", "2026-10-17", "19:00", "Acme Yoga");
        assert!(matches!(v.validate(&halloween, &ctx(), today()), ValidationOutcome::Accepted(_)));
    }

    #[test]
    fn test_time_rules() {
        let v = EventValidator::default();
        let bad = CandidateRecord::new("Sunrise Flow", "2026-03-03", "7am", "Acme Yoga");
        assert_eq!(rejected_code(v.validate(&bad, &ctx(), today())), RejectionCode::InvalidTime);
        let out_of_range = CandidateRecord::new("Sunrise Flow", "2026-03-03", "25:00", "Acme Yoga");
        assert_eq!(rejected_code(v.validate(&out_of_range, &ctx(), today())), RejectionCode::InvalidTime);

        let placeholder = CandidateRecord::new("Sunrise Flow", "2026-03-03", "09:00:00", "Acme Yoga");
        let ValidationOutcome::Accepted(event) = v.validate(&placeholder, &ctx(), today()) else { panic!() };
        assert!(event.has_tag(NEEDS_TIME_REVIEW_TAG));
    }

    #[test]
    fn test_clustered_slot_is_excluded_entirely() {
        let titles = ["Flow A", "Flow B", "Flow C", "Flow D", "Flow E"];
        let mut candidates: Vec<CandidateRecord> = titles
            .iter()
            .map(|t| CandidateRecord::new(t, "2026-03-05", "18:00", "Acme Yoga"))
            .collect();
        candidates.push(CandidateRecord::new("Yin Flow", "2026-03-05", "19:30", "Acme Yoga"));

        let batch = EventValidator::default().validate_batch(&candidates, &ctx(), today());
        assert_eq!(batch.count(RejectionCode::ClusteringSuspicious), 5);
        assert_eq!(batch.accepted.len(), 1);
        assert_eq!(batch.accepted[0].title, "Yin Flow");
    }

    #[test]
    fn test_cluster_at_threshold_is_kept() {
        let candidates: Vec<CandidateRecord> = ["Flow A", "Flow B", "Flow C"]
            .iter()
            .map(|t| CandidateRecord::new(t, "2026-03-05", "18:00", "Acme Yoga"))
            .collect();
        let batch = EventValidator::default().validate_batch(&candidates, &ctx(), today());
        assert_eq!(batch.accepted.len(), 3);
        assert!(batch.rejected.is_empty());
    }
}
