//! Cheap pre-filter deciding whether a page is worth an AI extraction call.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::domain::count_phrase;

static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[/.-]\d{1,2}(?:[/.-]\d{2,4})?)\b")
        .expect("numeric date pattern")
});

static NAMED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?|mon|tues?|wed(?:nes)?|thu(?:rs?)?|fri|sat(?:ur)?|sun)(?:day)?s?\b",
    )
    .expect("named date pattern")
});

static TIME_OF_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:[01]?\d|2[0-3]):[0-5]\d(?:\s*[ap]\.?m\b\.?)?|\b(?:1[0-2]|0?[1-9])\s*[ap]\.?m\b\.?")
        .expect("time pattern")
});

const DOMAIN_KEYWORDS: &[&str] = &[
    "class", "classes", "event", "events", "schedule", "workshop", "workshops", "session",
    "sessions", "course", "lesson", "lessons", "camp", "register", "book now", "drop-in",
    "timetable", "calendar", "retreat", "seminar", "series",
];

const DATE_WEIGHT: f64 = 1.0;
const TIME_WEIGHT: f64 = 1.0;
const KEYWORD_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalReport {
    pub date_hits: usize,
    pub time_hits: usize,
    pub keyword_hits: usize,
    pub score: f64,
    pub has_signal: bool,
}

/// Scores a page by its density of date, time and listing vocabulary.
#[derive(Debug, Clone)]
pub struct SignalDetector {
    threshold: f64,
}

impl SignalDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn assess(&self, page_text: &str) -> SignalReport {
        let date_hits = NUMERIC_DATE.find_iter(page_text).count() + NAMED_DATE.find_iter(page_text).count();
        let time_hits = TIME_OF_DAY.find_iter(page_text).count();

        let lower = page_text.to_lowercase();
        let keyword_hits = DOMAIN_KEYWORDS
            .iter()
            .map(|kw| count_phrase(&lower, kw))
            .sum::<usize>();

        let score = date_hits as f64 * DATE_WEIGHT
            + time_hits as f64 * TIME_WEIGHT
            + keyword_hits as f64 * KEYWORD_WEIGHT;

        // Listing vocabulary alone never qualifies: something must look like a date or time
        let has_signal = score >= self.threshold && date_hits + time_hits > 0;

        SignalReport { date_hits, time_hits, keyword_hits, score, has_signal }
    }
}
