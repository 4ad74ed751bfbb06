//! Booking-system discovery from page markup and URLs.

pub mod signatures;

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::error;

pub use signatures::{ProviderSignature, PROVIDER_SIGNATURES};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderMatch {
    pub system_key: String,
    pub extracted_id: Option<String>,
    pub priority: i32,
}

struct CompiledSignature {
    system_key: &'static str,
    priority: i32,
    patterns: Vec<Regex>,
}

pub struct ProviderDetector {
    signatures: Vec<CompiledSignature>,
}

impl Default for ProviderDetector {
    fn default() -> Self {
        Self::new(PROVIDER_SIGNATURES)
    }
}

impl ProviderDetector {
    pub fn new(catalog: &[ProviderSignature]) -> Self {
        let signatures = catalog
            .iter()
            .map(|sig| CompiledSignature {
                system_key: sig.system_key,
                priority: sig.priority,
                patterns: sig
                    .detect_patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            error!("Invalid signature pattern for {}: {}", sig.system_key, e);
                            None
                        }
                    })
                    .collect(),
            })
            .collect();
        Self { signatures }
    }

    /// All providers found in the page or its URL, highest priority first.
    /// A system seen both with and without an identifier is reported only with it.
    pub fn detect(&self, html: &str, url: &str) -> Vec<ProviderMatch> {
        let mut matches = Vec::new();

        for sig in &self.signatures {
            let mut ids: Vec<String> = Vec::new();
            let mut present = false;

            for re in &sig.patterns {
                for haystack in [html, url] {
                    for caps in re.captures_iter(haystack) {
                        present = true;
                        if let Some(id) = caps.get(1) {
                            let id = id.as_str().to_string();
                            if !ids.contains(&id) {
                                ids.push(id);
                            }
                        }
                    }
                }
            }

            if ids.is_empty() && present {
                matches.push(ProviderMatch {
                    system_key: sig.system_key.to_string(),
                    extracted_id: None,
                    priority: sig.priority,
                });
            }
            for id in ids {
                matches.push(ProviderMatch {
                    system_key: sig.system_key.to_string(),
                    extracted_id: Some(id),
                    priority: sig.priority,
                });
            }
        }

        // case-insensitive ids ("ABC123" vs "abc123") are the same tenant
        let mut seen = HashSet::new();
        matches.retain(|m| {
            seen.insert((m.system_key.clone(), m.extracted_id.as_ref().map(|id| id.to_lowercase())))
        });
        matches.sort_by(|a, b| b.priority.cmp(&a.priority));
        matches
    }
}
