//! Queue job model.
//!
//! A job is the unit of background work. "Retrying" is never materialized as
//! a status: a failed-but-retryable job goes back to pending with a future
//! scheduled_at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default upper bound on claim attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Kind of work a job row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// OCR the original blob into Markdown.
    Convert,
    /// Move the original blob to archive storage.
    Archive,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Archive => "archive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "convert" => Some(Self::Convert),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }
}

/// Queue status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
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

/// A row in the durable job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub document_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Higher values are claimed first.
    pub priority: i64,
    /// Incremented exactly once per successful claim.
    pub attempts: i64,
    pub max_attempts: i64,
    pub payload: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Claiming worker; only set while processing.
    pub worker_id: Option<String>,
    /// Earliest time the job may be claimed.
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trip() {
        assert_eq!(JobType::from_str("convert"), Some(JobType::Convert));
        assert_eq!(JobType::from_str("archive"), Some(JobType::Archive));
        assert_eq!(JobType::from_str("transcode"), None);
        assert_eq!(JobType::Convert.as_str(), "convert");
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
