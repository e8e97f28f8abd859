use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pending::PendingKind;

/// Marker that distinguishes a failed catalog status from a successful one.
pub const ERROR_MARKER: &str = "Error";

/// Progress of one catalog inside a sync run, as shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub catalog_name: String,
    pub progress: u8, // 0..=100
    pub is_completed: bool,
    pub status: String,
}

impl SyncStatus {
    pub fn starting(catalog_name: &str) -> Self {
        Self {
            catalog_name: catalog_name.to_string(),
            progress: 0,
            is_completed: false,
            status: "Starting".to_string(),
        }
    }

    pub fn saving(catalog_name: &str, records: usize) -> Self {
        Self {
            catalog_name: catalog_name.to_string(),
            progress: 50,
            is_completed: false,
            status: format!("Saving {records} records"),
        }
    }

    pub fn succeeded(catalog_name: &str, records: usize) -> Self {
        Self {
            catalog_name: catalog_name.to_string(),
            progress: 100,
            is_completed: true,
            status: format!("Synced {records} records"),
        }
    }

    /// A completed status carrying the failure reason. `progress` is kept at the last
    /// reported value so it never goes backwards.
    pub fn failed(catalog_name: &str, progress: u8, reason: &str) -> Self {
        Self {
            catalog_name: catalog_name.to_string(),
            progress,
            is_completed: true,
            status: format!("{ERROR_MARKER}: {reason}"),
        }
    }

    pub fn is_success(&self) -> bool {
        self.is_completed && !self.status.contains(ERROR_MARKER)
    }

    pub fn is_error(&self) -> bool {
        self.is_completed && self.status.contains(ERROR_MARKER)
    }
}

/// Final outcome of one catalog in one run. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub catalog_name: String,
    pub success: bool,
    pub message: String,
    pub records_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl SyncResult {
    pub(crate) fn from_status(status: &SyncStatus, records_count: usize) -> Self {
        Self {
            catalog_name: status.catalog_name.clone(),
            success: status.is_success(),
            message: status.status.clone(),
            records_count,
            timestamp: Utc::now(),
        }
    }
}

/// Everything a catalog run produced, in catalog order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSyncReport {
    pub statuses: Vec<SyncStatus>,
    pub results: Vec<SyncResult>,
}

impl CatalogSyncReport {
    /// True only when every catalog completed without error.
    pub fn is_fully_synced(&self) -> bool {
        !self.statuses.is_empty() && self.statuses.iter().all(SyncStatus::is_success)
    }

    pub fn succeeded(&self) -> usize {
        self.statuses.iter().filter(|s| s.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SyncStatus> {
        self.statuses.iter().filter(|s| s.is_error())
    }

    pub fn total_records(&self) -> usize {
        self.results.iter().map(|r| r.records_count).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadFailure {
    pub local_id: i64,
    pub message: String,
}

/// Aggregate outcome of draining one record kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReport {
    pub kind: PendingKind,
    pub attempted: usize,
    pub success_count: usize,
    pub failures: Vec<UploadFailure>,
    /// Set when the backlog of this kind could not be read, so nothing was tried.
    pub error: Option<String>,
}

impl UploadReport {
    pub fn new(kind: PendingKind) -> Self {
        Self {
            kind,
            attempted: 0,
            success_count: 0,
            failures: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn unreadable(kind: PendingKind, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(kind)
        }
    }

    /// Nothing was queued, so nothing was sent.
    pub fn nothing_to_send(&self) -> bool {
        self.attempted == 0 && self.error.is_none()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty() && self.error.is_none()
    }

    pub fn failure_messages(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.message.as_str()).collect()
    }

    /// One-line text for an alert.
    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return format!(
                "{} records could not be read: {error}",
                self.kind.display_name()
            );
        }
        if self.nothing_to_send() {
            return format!("No pending {} records to send", self.kind.display_name());
        }
        if self.failures.is_empty() {
            format!(
                "{} of {} {} records sent",
                self.success_count,
                self.attempted,
                self.kind.display_name()
            )
        } else {
            format!(
                "{} of {} {} records sent, {} failed: {}",
                self.success_count,
                self.attempted,
                self.kind.display_name(),
                self.failures.len(),
                self.failure_messages().join("; ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_marker_decides_outcome() {
        let ok = SyncStatus::succeeded("Campos", 12);
        assert!(ok.is_success());
        assert!(!ok.is_error());

        let bad = SyncStatus::failed("Campos", 0, "timeout");
        assert!(bad.is_error());
        assert!(!bad.is_success());
        assert!(bad.status.contains("timeout"));
    }

    #[test]
    fn unfinished_status_is_neither() {
        let s = SyncStatus::starting("Lotes");
        assert!(!s.is_success());
        assert!(!s.is_error());
    }

    #[test]
    fn empty_report_is_not_fully_synced() {
        assert!(!CatalogSyncReport::default().is_fully_synced());
    }

    #[test]
    fn upload_summary_lists_failures() {
        let mut report = UploadReport::new(PendingKind::RatTrap);
        report.attempted = 3;
        report.success_count = 2;
        report.failures.push(UploadFailure {
            local_id: 2,
            message: "duplicate".to_string(),
        });
        let text = report.summary();
        assert!(text.contains("2 of 3"));
        assert!(text.contains("duplicate"));
        assert!(!report.is_complete_success());
    }

    #[test]
    fn unreadable_backlog_is_not_empty() {
        let report = UploadReport::unreadable(PendingKind::Rainfall, "disk I/O error".into());
        assert!(!report.nothing_to_send());
        assert!(!report.is_complete_success());
        assert!(report.summary().contains("disk I/O error"));
    }
}
