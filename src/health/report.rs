use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

use super::{HealthIssue, Severity};
use crate::domain::Source;

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub name: String,
    pub booking_system: Option<String>,
    pub hours_since_scrape: Option<i64>,
    pub consecutive_failures: u32,
    pub last_item_count: Option<u32>,
    /// Worst severity among the source's issues
    pub worst: Option<Severity>,
}

impl SourceStatus {
    pub fn new(source: &Source, issues: &[HealthIssue], now: DateTime<Utc>) -> Self {
        Self {
            source_id: source.id.clone(),
            name: source.name.clone(),
            booking_system: source.booking_system.clone(),
            hours_since_scrape: source.last_scraped.map(|ts| (now - ts).num_hours()),
            consecutive_failures: source.consecutive_failures,
            last_item_count: source.last_item_count,
            worst: issues.iter().map(|i| i.severity).min(),
        }
    }

    fn status_label(&self) -> &'static str {
        match self.worst {
            Some(Severity::High) => "🔴 HIGH",
            Some(Severity::Medium) => "🟡 MEDIUM",
            None => "🟢 OK",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub statuses: Vec<SourceStatus>,
    pub issues: Vec<HealthIssue>,
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

impl HealthReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_high(&self) -> bool {
        self.count(Severity::High) > 0
    }

    /// Per-source status table followed by the issue list.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Source health as of {}", self.checked_at.format("%Y-%m-%d %H:%M UTC"));
        let _ = writeln!(
            out,
            "{:<28} {:<16} {:>10} {:>8} {:>6}  {}",
            "SOURCE", "SYSTEM", "LAST RUN", "FAILS", "ITEMS", "STATUS"
        );
        let _ = writeln!(out, "{}", "-".repeat(86));

        for status in &self.statuses {
            let last_run = status
                .hours_since_scrape
                .map(|h| format!("{h}h ago"))
                .unwrap_or_else(|| "never".to_string());
            let items = status
                .last_item_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{:<28} {:<16} {:>10} {:>8} {:>6}  {}",
                truncate(&status.name, 28),
                truncate(status.booking_system.as_deref().unwrap_or("-"), 16),
                last_run,
                status.consecutive_failures,
                items,
                status.status_label()
            );
        }

        let _ = writeln!(out);
        if self.issues.is_empty() {
            let _ = writeln!(out, "✅ All {} active sources healthy", self.statuses.len());
        } else {
            let _ = writeln!(
                out,
                "{} HIGH, {} MEDIUM issue(s):",
                self.count(Severity::High),
                self.count(Severity::Medium)
            );
            for issue in &self.issues {
                let _ = writeln!(out, "  [{}] {}: {}", issue.severity, issue.source_name, issue.message);
            }
        }
        out
    }

    /// Alert text, or `None` when there is nothing to report.
    pub fn alert_message(&self) -> Option<String> {
        if self.issues.is_empty() {
            return None;
        }
        let mut out = format!(
            "🚨 Listing source health: {} HIGH, {} MEDIUM issue(s) across {} active sources",
            self.count(Severity::High),
            self.count(Severity::Medium),
            self.statuses.len()
        );
        for issue in &self.issues {
            let _ = write!(out, "\n• [{}] {} ({}): {}", issue.severity, issue.source_name, issue.source_id, issue.message);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthMonitor, IssueType};
    use chrono::TimeZone;

    fn report() -> HealthReport {
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap();
        let sources = vec![Source::new("acme", "Acme Yoga", "https://acme.test")];
        HealthMonitor::new(3, 48, 24).sweep(&sources, now)
    }

    #[test]
    fn test_table_lists_every_active_source() {
        let table = report().render_table();
        assert!(table.contains("Acme Yoga"));
        assert!(table.contains("never"));
        assert!(table.contains("HIGH"));
    }

    #[test]
    fn test_alert_message_lists_issues() {
        let report = report();
        assert_eq!(report.issues[0].issue_type, IssueType::NeverScraped);
        let message = report.alert_message().unwrap();
        assert!(message.starts_with("🚨"));
        assert!(message.contains("[HIGH] Acme Yoga (acme): never scraped"));
    }

    #[test]
    fn test_no_alert_when_healthy() {
        let report = HealthReport { checked_at: Utc::now(), statuses: vec![], issues: vec![] };
        assert!(report.alert_message().is_none());
        assert!(!report.has_high());
        assert!(report.render_table().contains("All 0 active sources healthy"));
    }

    #[test]
    fn test_truncate_long_names() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("Acme Yoga and Wellness Collective", 10).chars().count(), 10);
    }
}
