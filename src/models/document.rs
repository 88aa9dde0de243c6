//! Document model.
//!
//! A document moves pending → processing → completed | failed, and may later
//! be archived by a retention job. Markdown content is only present once the
//! conversion has completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Allowed range for per-document retention.
pub const RETENTION_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Whether no further transition is permitted from this status,
    /// apart from the single completed → archived step.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Archived)
    }

    /// Check a status transition against the document lifecycle DAG.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Failed)
                | (Completed, Archived)
        )
    }
}

/// A submitted document and its conversion state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier, assigned server-side.
    pub id: String,
    /// Original file name as submitted.
    pub file_name: String,
    /// MIME type of the uploaded content.
    pub mime_type: String,
    /// Size of the uploaded blob in bytes.
    pub file_size: u64,
    /// Key of the original blob in the blob store.
    pub blob_key: Option<String>,
    /// Converted Markdown, present once completed.
    pub content: Option<String>,
    /// Free-form metadata; round-trips verbatim.
    pub metadata: serde_json::Value,
    pub status: DocumentStatus,
    pub error: Option<String>,
    /// Days the original is kept before archival.
    pub retention_days: i64,
    pub user_id: String,
    pub api_key_id: String,
    /// Owning batch, if submitted as part of one.
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a document row.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    pub blob_key: Option<String>,
    pub metadata: serde_json::Value,
    pub retention_days: i64,
    pub user_id: String,
    pub api_key_id: String,
    pub batch_id: Option<String>,
}

impl Default for NewDocument {
    fn default() -> Self {
        Self {
            file_name: String::new(),
            mime_type: "application/octet-stream".to_string(),
            file_size: 0,
            blob_key: None,
            metadata: serde_json::json!({}),
            retention_days: 30,
            user_id: String::new(),
            api_key_id: String::new(),
            batch_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
            DocumentStatus::Archived,
        ] {
            assert_eq!(DocumentStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(DocumentStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_lifecycle_dag() {
        use DocumentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Archived));

        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Archived.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Archived));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!DocumentStatus::Pending.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Completed.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
        assert!(DocumentStatus::Archived.is_terminal());
    }
}
