//! Per-stage metrics for the ingestion pipeline.
//!
//! Recording is a no-op until a recorder is installed, so library code and tests
//! can call these freely.

use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::constants::ENV_METRICS_ADDR;
use crate::error::{IngestError, Result};

/// All metric names used in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Pages
    PagesFetched,
    PagesFetchFailed,
    PagesWithoutSignal,

    // Extractor
    CandidatesExtracted,
    ExtractorCallsFailed,
    ExtractorWaitSeconds,

    // Verifier and validator
    CandidatesRejected,
    CandidatesAccepted,

    // Catalog
    EventsInserted,
    EventsDuplicate,
    EventsReplaced,

    // Sources
    SourceSuccesses,
    SourceFailures,
    SourcesDeactivated,
    SourcesDiscovered,
    ProviderDrift,
    AlertsSent,

    // Health
    HealthIssues,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PagesFetched => "listing_pages_fetched_total",
            MetricName::PagesFetchFailed => "listing_pages_fetch_failed_total",
            MetricName::PagesWithoutSignal => "listing_pages_without_signal_total",

            MetricName::CandidatesExtracted => "listing_candidates_extracted_total",
            MetricName::ExtractorCallsFailed => "listing_extractor_calls_failed_total",
            MetricName::ExtractorWaitSeconds => "listing_extractor_wait_seconds",

            MetricName::CandidatesRejected => "listing_candidates_rejected_total",
            MetricName::CandidatesAccepted => "listing_candidates_accepted_total",

            MetricName::EventsInserted => "listing_events_inserted_total",
            MetricName::EventsDuplicate => "listing_events_duplicate_total",
            MetricName::EventsReplaced => "listing_events_replaced_total",

            MetricName::SourceSuccesses => "listing_source_successes_total",
            MetricName::SourceFailures => "listing_source_failures_total",
            MetricName::SourcesDeactivated => "listing_sources_deactivated_total",
            MetricName::SourcesDiscovered => "listing_sources_discovered_total",
            MetricName::ProviderDrift => "listing_provider_drift_total",
            MetricName::AlertsSent => "listing_alerts_sent_total",

            MetricName::HealthIssues => "listing_health_issues_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus exporter when `LISTING_METRICS_ADDR` is set. Returns whether one was installed.
pub fn init() -> Result<bool> {
    let Ok(addr_str) = std::env::var(ENV_METRICS_ADDR) else {
        return Ok(false);
    };

    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|e| IngestError::Config(format!("invalid {ENV_METRICS_ADDR} '{addr_str}': {e}")))?;

    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => {
            info!("Prometheus exporter listening on http://{}/metrics", addr);
            Ok(true)
        }
        Err(e) => {
            warn!("Failed to install Prometheus exporter: {}", e);
            Ok(false)
        }
    }
}

// ============================================================================
// Pages
// ============================================================================

pub mod pages {
    use super::MetricName;

    pub fn fetched() {
        ::metrics::counter!(MetricName::PagesFetched.as_str()).increment(1);
    }

    pub fn fetch_failed(error_kind: &'static str) {
        ::metrics::counter!(MetricName::PagesFetchFailed.as_str(), "kind" => error_kind).increment(1);
    }

    pub fn without_signal() {
        ::metrics::counter!(MetricName::PagesWithoutSignal.as_str()).increment(1);
    }
}

// ============================================================================
// Extractor
// ============================================================================

pub mod extractor {
    use super::MetricName;

    pub fn call_succeeded(candidates: usize) {
        ::metrics::counter!(MetricName::CandidatesExtracted.as_str()).increment(candidates as u64);
    }

    pub fn call_failed() {
        ::metrics::counter!(MetricName::ExtractorCallsFailed.as_str()).increment(1);
    }

    /// Time spent waiting on the shared rate limiter
    pub fn wait_recorded(secs: f64) {
        ::metrics::histogram!(MetricName::ExtractorWaitSeconds.as_str()).record(secs);
    }
}

// ============================================================================
// Verifier / Validator
// ============================================================================

pub mod candidates {
    use super::MetricName;
    use crate::domain::RejectionCode;

    pub fn rejected(code: RejectionCode) {
        ::metrics::counter!(MetricName::CandidatesRejected.as_str(), "code" => code.as_str()).increment(1);
    }

    pub fn accepted(count: usize) {
        ::metrics::counter!(MetricName::CandidatesAccepted.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Catalog
// ============================================================================

pub mod catalog {
    use super::MetricName;

    pub fn inserted(count: usize) {
        ::metrics::counter!(MetricName::EventsInserted.as_str()).increment(count as u64);
    }

    pub fn duplicates(count: usize) {
        ::metrics::counter!(MetricName::EventsDuplicate.as_str()).increment(count as u64);
    }

    pub fn replaced(deleted: usize) {
        ::metrics::counter!(MetricName::EventsReplaced.as_str()).increment(deleted as u64);
    }
}

// ============================================================================
// Sources
// ============================================================================

pub mod sources {
    use super::MetricName;

    pub fn success() {
        ::metrics::counter!(MetricName::SourceSuccesses.as_str()).increment(1);
    }

    pub fn failure(error_kind: &'static str) {
        ::metrics::counter!(MetricName::SourceFailures.as_str(), "kind" => error_kind).increment(1);
    }

    pub fn deactivated() {
        ::metrics::counter!(MetricName::SourcesDeactivated.as_str()).increment(1);
    }

    pub fn discovered(system_key: &str) {
        ::metrics::counter!(MetricName::SourcesDiscovered.as_str(), "system" => system_key.to_string())
            .increment(1);
    }

    pub fn provider_drift() {
        ::metrics::counter!(MetricName::ProviderDrift.as_str()).increment(1);
    }

    pub fn alert_sent(delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        ::metrics::counter!(MetricName::AlertsSent.as_str(), "outcome" => outcome).increment(1);
    }
}

// ============================================================================
// Health
// ============================================================================

pub mod health {
    use super::MetricName;

    pub fn issues(severity: &'static str, count: usize) {
        ::metrics::counter!(MetricName::HealthIssues.as_str(), "severity" => severity).increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed_and_unique() {
        let all = [
            MetricName::PagesFetched,
            MetricName::PagesFetchFailed,
            MetricName::PagesWithoutSignal,
            MetricName::CandidatesExtracted,
            MetricName::ExtractorCallsFailed,
            MetricName::ExtractorWaitSeconds,
            MetricName::CandidatesRejected,
            MetricName::CandidatesAccepted,
            MetricName::EventsInserted,
            MetricName::EventsDuplicate,
            MetricName::EventsReplaced,
            MetricName::SourceSuccesses,
            MetricName::SourceFailures,
            MetricName::SourcesDeactivated,
            MetricName::SourcesDiscovered,
            MetricName::ProviderDrift,
            MetricName::AlertsSent,
            MetricName::HealthIssues,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), all.len());
        assert!(names.iter().all(|n| n.starts_with("listing_")));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        pages::fetched();
        candidates::rejected(crate::domain::RejectionCode::PastDate);
        extractor::wait_recorded(1.5);
    }
}
