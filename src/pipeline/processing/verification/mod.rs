//! Deterministic grounding checks: a candidate survives only if the page actually says it.

pub mod catalog;

use std::collections::HashSet;
use tracing::debug;

use crate::config::VerifierSettings;
use crate::domain::{normalize_text, CandidateRecord, RejectionCode, VerificationFailure, VerificationResult};
pub use catalog::{match_forbidden, ForbiddenKind, ForbiddenPattern, FORBIDDEN_TITLES};

/// Words shorter than this do not count toward the grounding ratio.
const MIN_SIGNIFICANT_WORD_LEN: usize = 3;

fn tokenize(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
}

/// Fraction of the title's significant words found in the page.
/// Titles made only of short words are checked word-for-word instead.
pub fn grounding_ratio(title: &str, page_text: &str) -> f64 {
    let normalized_title = normalize_text(title);
    let normalized_page = normalize_text(page_text);
    let page_words: HashSet<&str> = tokenize(&normalized_page).collect();

    let all_words: Vec<&str> = tokenize(&normalized_title).collect();
    let significant: Vec<&str> = all_words
        .iter()
        .copied()
        .filter(|w| w.chars().count() >= MIN_SIGNIFICANT_WORD_LEN)
        .collect();
    let words = if significant.is_empty() { all_words } else { significant };

    if words.is_empty() {
        return 0.0;
    }
    let found = words.iter().filter(|w| page_words.contains(*w)).count();
    found as f64 / words.len() as f64
}

pub struct SourceVerifier {
    settings: VerifierSettings,
}

impl Default for SourceVerifier {
    fn default() -> Self {
        Self::new(VerifierSettings::default())
    }
}

impl SourceVerifier {
    pub fn new(settings: VerifierSettings) -> Self {
        Self { settings }
    }

    /// Runs every check and reports all failures; the first one is the candidate's rejection code.
    pub fn verify(&self, candidate: &CandidateRecord, page_text: &str) -> VerificationResult {
        let mut failed_checks = Vec::new();
        let title = candidate.title.trim();
        let normalized_title = normalize_text(title);

        let ratio = grounding_ratio(title, page_text);
        if ratio < self.settings.min_match_ratio {
            failed_checks.push(VerificationFailure {
                code: RejectionCode::SourceVerificationFailed,
                reason: format!(
                    "only {:.0}% of title words found in page text (need {:.0}%)",
                    ratio * 100.0,
                    self.settings.min_match_ratio * 100.0
                ),
            });
        }

        if self.settings.require_source_quote {
            let quote = normalize_text(&candidate.source_quote);
            if quote.is_empty() {
                failed_checks.push(VerificationFailure {
                    code: RejectionCode::SourceVerificationFailed,
                    reason: "missing source quote".to_string(),
                });
            } else if !normalize_text(page_text).contains(&quote) {
                failed_checks.push(VerificationFailure {
                    code: RejectionCode::SourceVerificationFailed,
                    reason: "source quote does not appear in page text".to_string(),
                });
            }
        }

        if let Some(hit) = match_forbidden(&normalized_title) {
            failed_checks.push(VerificationFailure {
                code: RejectionCode::ForbiddenTitle,
                reason: format!("title matches forbidden pattern ({:?}: {})", hit.kind, hit.label),
            });
        }

        let len = title.chars().count();
        if len < self.settings.min_title_len || len > self.settings.max_title_len {
            failed_checks.push(VerificationFailure {
                code: RejectionCode::ForbiddenTitle,
                reason: format!(
                    "title length {} outside {}..={}",
                    len, self.settings.min_title_len, self.settings.max_title_len
                ),
            });
        }

        if !normalized_title.is_empty() && normalized_title == normalize_text(&candidate.venue_name) {
            failed_checks.push(VerificationFailure {
                code: RejectionCode::ForbiddenTitle,
                reason: "title equals venue name".to_string(),
            });
        }

        let passed = failed_checks.is_empty();
        if !passed {
            debug!(title = %candidate.title, failures = failed_checks.len(), "Candidate failed verification");
        }

        VerificationResult {
            candidate: candidate.clone(),
            passed,
            failed_checks,
        }
    }
}
