//! Batch model.
//!
//! Batch progress is a derived projection over child documents; counts are
//! recomputed from the documents table, never incremented in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Derive the batch status from child document counts.
///
/// Terminal iff completed + failed = total; `failed` only when every child
/// failed; `processing` as soon as any child reached a terminal state.
pub fn derive_batch_status(completed: i64, failed: i64, total: i64) -> BatchStatus {
    if total > 0 && completed + failed >= total {
        if failed >= total {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        }
    } else if completed + failed > 0 {
        BatchStatus::Processing
    } else {
        BatchStatus::Pending
    }
}

/// A batch of documents submitted together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub user_id: String,
    pub api_key_id: String,
    pub total_documents: i64,
    pub completed_documents: i64,
    pub failed_documents: i64,
    pub status: BatchStatus,
    pub priority: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_pending() {
        assert_eq!(derive_batch_status(0, 0, 3), BatchStatus::Pending);
    }

    #[test]
    fn test_derive_processing() {
        assert_eq!(derive_batch_status(1, 0, 3), BatchStatus::Processing);
        assert_eq!(derive_batch_status(0, 1, 3), BatchStatus::Processing);
        assert_eq!(derive_batch_status(1, 1, 3), BatchStatus::Processing);
    }

    #[test]
    fn test_derive_completed_with_partial_failures() {
        // failed < total means the batch still counts as completed
        assert_eq!(derive_batch_status(2, 1, 3), BatchStatus::Completed);
        assert_eq!(derive_batch_status(3, 0, 3), BatchStatus::Completed);
    }

    #[test]
    fn test_derive_failed_only_when_all_failed() {
        assert_eq!(derive_batch_status(0, 3, 3), BatchStatus::Failed);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::from_str(s.as_str()), Some(s));
        }
    }
}
