use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of one export attempt. `Done` and `Failed` are terminal;
/// once reached the task is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Processing => "processing",
            ExportStatus::Done => "done",
            ExportStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ExportStatus::Pending),
            "processing" => Some(ExportStatus::Processing),
            "done" => Some(ExportStatus::Done),
            "failed" => Some(ExportStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Done | ExportStatus::Failed)
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one export attempt, one row per admitted task.
/// Invariant: `status == Done` iff `file_id` is set.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub name: String,
    pub file_id: Option<i64>,
    pub mime: String,
    pub uploaded_at: i64,
    pub updated_at: i64,
    pub uploaded_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub status: ExportStatus,
}

#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub name: String,
    pub mime: String,
    pub uploaded_at: i64,
    pub uploaded_by: i64,
    pub status: ExportStatus,
    pub agent_id: Option<i64>,
    pub call_id: Option<String>,
    pub domain_id: i64,
}

/// Status transition for an existing history row. A `file_id` of `None` (or
/// zero) keeps the stored reference untouched.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub id: i64,
    pub status: ExportStatus,
    pub updated_by: i64,
    pub file_id: Option<i64>,
}

/// One page of history listing. `next` is derived by over-fetching one row
/// past `size`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub page: i64,
    pub next: bool,
    pub items: Vec<HistoryRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ExportStatus::Pending,
            ExportStatus::Processing,
            ExportStatus::Done,
            ExportStatus::Failed,
        ] {
            assert_eq!(ExportStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExportStatus::parse("completed"), None);
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(!ExportStatus::Pending.is_terminal());
        assert!(!ExportStatus::Processing.is_terminal());
        assert!(ExportStatus::Done.is_terminal());
        assert!(ExportStatus::Failed.is_terminal());
    }
}
