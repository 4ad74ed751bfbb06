//! Read-only sweep of the source registry producing severity-classified issues.

pub mod report;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use crate::config::{HealthSettings, RegistrySettings};
use crate::domain::Source;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::storage::Datastore;

pub use report::{HealthReport, SourceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    High,
    Medium,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueType {
    ConsecutiveFailures,
    NeverScraped,
    Stale,
    /// Last run "succeeded" but produced nothing
    SilentFailure,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::ConsecutiveFailures => "consecutive_failures",
            IssueType::NeverScraped => "never_scraped",
            IssueType::Stale => "stale",
            IssueType::SilentFailure => "silent_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthIssue {
    pub severity: Severity,
    pub source_id: String,
    pub source_name: String,
    pub issue_type: IssueType,
    pub message: String,
}

pub struct HealthMonitor {
    failure_threshold: u32,
    stale_high: Duration,
    stale_medium: Duration,
}

impl HealthMonitor {
    pub fn new(failure_threshold: u32, stale_high_hours: i64, stale_medium_hours: i64) -> Self {
        Self {
            failure_threshold,
            stale_high: Duration::hours(stale_high_hours),
            stale_medium: Duration::hours(stale_medium_hours),
        }
    }

    pub fn from_settings(registry: &RegistrySettings, health: &HealthSettings) -> Self {
        Self::new(registry.failure_threshold, health.stale_high_hours, health.stale_medium_hours)
    }

    /// Issues for one source as of `now`. Inactive sources are the sweep's concern, not this one's.
    pub fn classify(&self, source: &Source, now: DateTime<Utc>) -> Vec<HealthIssue> {
        let mut issues = Vec::new();
        let mut push = |severity: Severity, issue_type: IssueType, message: String| {
            issues.push(HealthIssue {
                severity,
                source_id: source.id.clone(),
                source_name: source.name.clone(),
                issue_type,
                message,
            });
        };

        if source.consecutive_failures >= self.failure_threshold {
            push(
                Severity::High,
                IssueType::ConsecutiveFailures,
                format!(
                    "failed {} consecutive times (last error: {})",
                    source.consecutive_failures,
                    source.last_error.as_deref().unwrap_or("unknown")
                ),
            );
        }

        match source.last_scraped {
            None => push(Severity::High, IssueType::NeverScraped, "never scraped".to_string()),
            Some(last) => {
                let elapsed = now - last;
                if elapsed > self.stale_high {
                    push(
                        Severity::High,
                        IssueType::Stale,
                        format!("not scraped for {}h", elapsed.num_hours()),
                    );
                } else if elapsed > self.stale_medium {
                    push(
                        Severity::Medium,
                        IssueType::Stale,
                        format!("not scraped for {}h", elapsed.num_hours()),
                    );
                }
            }
        }

        if source.last_scrape_success == Some(true) && matches!(source.last_item_count, None | Some(0)) {
            push(
                Severity::Medium,
                IssueType::SilentFailure,
                "last scrape succeeded but found no listings".to_string(),
            );
        }

        issues
    }

    /// Classify every active source.
    pub fn sweep(&self, sources: &[Source], now: DateTime<Utc>) -> HealthReport {
        let mut statuses = Vec::new();
        let mut issues = Vec::new();

        for source in sources.iter().filter(|s| s.is_active) {
            let source_issues = self.classify(source, now);
            statuses.push(SourceStatus::new(source, &source_issues, now));
            issues.extend(source_issues);
        }
        issues.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.source_name.cmp(&b.source_name)));

        let report = HealthReport { checked_at: now, statuses, issues };
        metrics::health::issues(Severity::High.as_str(), report.count(Severity::High));
        metrics::health::issues(Severity::Medium.as_str(), report.count(Severity::Medium));
        report
    }

    pub async fn check(&self, store: &dyn Datastore, now: DateTime<Utc>) -> Result<HealthReport> {
        let sources = store.list_sources().await?;
        Ok(self.sweep(&sources, now))
    }
}
