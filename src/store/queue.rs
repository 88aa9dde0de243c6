//! Durable job queue operations: create, claim, complete, fail, and the
//! orphan recovery sweep.
//!
//! Claims run inside IMMEDIATE transactions with a status-guarded update, so
//! two workers can never both take the same row. Retry is expressed as
//! pending with a future scheduled_at, never as its own status.

use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, params_from_iter, Row};
use uuid::Uuid;

use super::{
    fmt_ts, immediate_tx, parse_datetime, parse_datetime_opt, to_option, Result, Store, StoreError,
};
use crate::models::{Job, JobStatus, JobType, DEFAULT_MAX_ATTEMPTS};

/// Base delay for rescheduling a job that failed while running. Real work is
/// expensive to redo, so the ladder starts at minutes.
const RETRY_BACKOFF_BASE_SECS: i64 = 60;

/// Base delay for requeueing an orphaned job. The work never completed, so
/// requeue cheaply.
const ORPHAN_REQUEUE_BASE_SECS: i64 = 5;

/// Error recorded on jobs (and their documents) failed by the orphan sweep.
const ORPHAN_ERROR: &str = "Max retry attempts exceeded (job timeout >5 minutes)";

/// Delay before the next attempt of a job that failed while running.
pub fn retry_backoff(attempts: i64) -> Duration {
    Duration::from_secs((RETRY_BACKOFF_BASE_SECS << attempts.clamp(0, 20)) as u64)
}

/// Delay before an orphaned job becomes claimable again.
pub fn orphan_requeue_backoff(attempts: i64) -> Duration {
    Duration::from_secs((ORPHAN_REQUEUE_BASE_SECS << attempts.clamp(0, 20)) as u64)
}

pub(crate) fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let job_type: String = row.get("job_type")?;
    let status: String = row.get("status")?;
    let payload: Option<String> = row.get("payload")?;
    let result: Option<String> = row.get("result")?;
    Ok(Job {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        job_type: JobType::from_str(&job_type).unwrap_or(JobType::Convert),
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
        priority: row.get("priority")?,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        payload: payload.and_then(|s| serde_json::from_str(&s).ok()),
        result: result.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get("error")?,
        worker_id: row.get("worker_id")?,
        scheduled_at: parse_datetime(&row.get::<_, String>("scheduled_at")?),
        started_at: parse_datetime_opt(row.get("started_at")?),
        completed_at: parse_datetime_opt(row.get("completed_at")?),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

/// Parameters for enqueueing a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub document_id: String,
    pub job_type: JobType,
    pub priority: i64,
    pub max_attempts: i64,
    pub payload: Option<serde_json::Value>,
    pub scheduled_at: Option<chrono::DateTime<Utc>>,
}

impl NewJob {
    pub fn convert(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            job_type: JobType::Convert,
            priority: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            payload: None,
            scheduled_at: None,
        }
    }

    pub fn archive(document_id: impl Into<String>) -> Self {
        Self {
            job_type: JobType::Archive,
            ..Self::convert(document_id)
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Terminal outcome written for a job and its document in one transaction.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed {
        result: Option<serde_json::Value>,
        content: String,
        metadata: serde_json::Value,
    },
    Failed {
        error: String,
    },
}

/// SQLite-backed repository for the job queue.
pub struct QueueRepository {
    store: Store,
}

impl QueueRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a pending job. scheduled_at defaults to now.
    pub async fn create_job(&self, new_job: NewJob) -> Result<Job> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let scheduled_at = new_job.scheduled_at.unwrap_or(now);

        super::with_retry("create_job", || {
            let conn = self.store.connect()?;
            conn.execute(
                r#"
                INSERT INTO jobs (
                    id, document_id, job_type, status, priority,
                    attempts, max_attempts, payload, scheduled_at, created_at
                ) VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?5, ?6, ?7, ?8)
                "#,
                params![
                    id,
                    new_job.document_id,
                    new_job.job_type.as_str(),
                    new_job.priority,
                    new_job.max_attempts,
                    new_job
                        .payload
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    fmt_ts(scheduled_at),
                    fmt_ts(now),
                ],
            )?;
            Ok(())
        })
        .await?;

        self.get(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))
    }

    /// Get a job by id.
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare_cached("SELECT * FROM jobs WHERE id = ?")?;
        to_option(stmt.query_row(params![id], row_to_job))
    }

    /// Whether any pending job is due. Drives the dispatch tick.
    pub fn has_due_jobs(&self) -> Result<bool> {
        let conn = self.store.connect()?;
        let due: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE status = 'pending' AND scheduled_at <= ?1)",
            params![fmt_ts(Utc::now())],
            |row| row.get(0),
        )?;
        Ok(due != 0)
    }

    /// Atomically claim the next due job for a worker.
    ///
    /// Candidate order: priority descending, then earliest scheduled_at, then
    /// insertion order. The update re-checks pending status inside the same
    /// transaction; a racing claim yields None rather than an error, and
    /// attempts is incremented exactly once per successful claim.
    pub async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>> {
        super::with_retry("claim_next_job", || {
            let conn = self.store.connect()?;
            immediate_tx(&conn, |conn| {
                let now = fmt_ts(Utc::now());

                let candidate: Option<String> = to_option(conn.query_row(
                    r#"
                    SELECT id FROM jobs
                    WHERE status = 'pending' AND scheduled_at <= ?1
                    ORDER BY priority DESC, scheduled_at ASC, rowid ASC
                    LIMIT 1
                    "#,
                    params![now],
                    |row| row.get(0),
                ))?;

                let Some(id) = candidate else {
                    return Ok(None);
                };

                let updated = conn.execute(
                    r#"
                    UPDATE jobs
                    SET status = 'processing', worker_id = ?2, started_at = ?3,
                        attempts = attempts + 1
                    WHERE id = ?1 AND status = 'pending'
                    "#,
                    params![id, worker_id, now],
                )?;
                if updated == 0 {
                    return Ok(None);
                }

                let job =
                    conn.query_row("SELECT * FROM jobs WHERE id = ?", params![id], row_to_job)?;
                Ok(Some(job))
            })
        })
        .await
    }

    /// Write the terminal outcome for a job and its document in one
    /// transaction, so readers never observe them disagreeing.
    pub async fn complete_job_and_document(
        &self,
        job_id: &str,
        document_id: &str,
        outcome: &JobOutcome,
    ) -> Result<()> {
        let now = Utc::now();
        super::with_retry("complete_job_and_document", || {
            let conn = self.store.connect()?;
            immediate_tx(&conn, |conn| {
                match outcome {
                    JobOutcome::Completed {
                        result,
                        content,
                        metadata,
                    } => {
                        conn.execute(
                            r#"
                            UPDATE jobs
                            SET status = 'completed', completed_at = ?2, result = ?3, error = NULL
                            WHERE id = ?1 AND status = 'processing'
                            "#,
                            params![
                                job_id,
                                fmt_ts(now),
                                result.as_ref().map(serde_json::to_string).transpose()?,
                            ],
                        )?;
                        conn.execute(
                            r#"
                            UPDATE documents
                            SET status = 'completed', content = ?2, metadata = ?3,
                                processed_at = ?4, error = NULL
                            WHERE id = ?1 AND status IN ('pending', 'processing')
                            "#,
                            params![
                                document_id,
                                content,
                                serde_json::to_string(metadata)?,
                                fmt_ts(now)
                            ],
                        )?;
                    }
                    JobOutcome::Failed { error } => {
                        conn.execute(
                            r#"
                            UPDATE jobs
                            SET status = 'failed', completed_at = ?2, error = ?3, worker_id = NULL
                            WHERE id = ?1 AND status = 'processing'
                            "#,
                            params![job_id, fmt_ts(now), error],
                        )?;
                        conn.execute(
                            r#"
                            UPDATE documents
                            SET status = 'failed', error = ?2
                            WHERE id = ?1 AND status IN ('pending', 'processing')
                            "#,
                            params![document_id, error],
                        )?;
                    }
                }
                Ok(())
            })
        })
        .await
    }

    /// Complete an archive job and transition its document to archived in
    /// one transaction. The document must still be in completed status;
    /// anything else rolls back and surfaces as an invariant violation.
    pub async fn complete_archive_job(
        &self,
        job_id: &str,
        document_id: &str,
        metadata: &serde_json::Value,
        result: Option<&serde_json::Value>,
    ) -> Result<()> {
        let now = Utc::now();
        super::with_retry("complete_archive_job", || {
            let conn = self.store.connect()?;
            immediate_tx(&conn, |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE documents
                    SET status = 'archived', metadata = ?2, archived_at = ?3
                    WHERE id = ?1 AND status = 'completed'
                    "#,
                    params![document_id, serde_json::to_string(metadata)?, fmt_ts(now)],
                )?;
                if updated == 0 {
                    return Err(StoreError::Invalid(format!(
                        "document {} is not in completed status, cannot archive",
                        document_id
                    )));
                }
                conn.execute(
                    r#"
                    UPDATE jobs
                    SET status = 'completed', completed_at = ?2, result = ?3, error = NULL
                    WHERE id = ?1 AND status = 'processing'
                    "#,
                    params![
                        job_id,
                        fmt_ts(now),
                        result.map(serde_json::to_string).transpose()?,
                    ],
                )?;
                Ok(())
            })
        })
        .await
    }

    /// Record a failure for a claimed job.
    ///
    /// If attempts remain, the job goes back to pending with
    /// scheduled_at = now + 2^attempts × 60 s; otherwise it is terminally
    /// failed. Returns the job's resulting status. The retry decision uses
    /// the attempts counter already incremented by the claim.
    pub async fn fail_job(&self, job_id: &str, error: &str) -> Result<JobStatus> {
        let now = Utc::now();
        super::with_retry("fail_job", || {
            let conn = self.store.connect()?;
            immediate_tx(&conn, |conn| {
                let row = to_option(conn.query_row(
                    "SELECT attempts, max_attempts, status FROM jobs WHERE id = ?",
                    params![job_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                ))?;
                let Some((attempts, max_attempts, status)) = row else {
                    return Err(StoreError::NotFound(format!("job {}", job_id)));
                };

                let current = JobStatus::from_str(&status).unwrap_or(JobStatus::Failed);
                if current != JobStatus::Processing {
                    // Terminal states never revert; a duplicate failure
                    // report is a no-op.
                    return Ok(current);
                }

                if attempts < max_attempts {
                    let next = now + retry_backoff(attempts);
                    conn.execute(
                        r#"
                        UPDATE jobs
                        SET status = 'pending', error = ?2, scheduled_at = ?3,
                            worker_id = NULL, started_at = NULL
                        WHERE id = ?1 AND status = 'processing'
                        "#,
                        params![job_id, error, fmt_ts(next)],
                    )?;
                    Ok(JobStatus::Pending)
                } else {
                    conn.execute(
                        r#"
                        UPDATE jobs
                        SET status = 'failed', error = ?2, completed_at = ?3, worker_id = NULL
                        WHERE id = ?1 AND status = 'processing'
                        "#,
                        params![job_id, error, fmt_ts(now)],
                    )?;
                    Ok(JobStatus::Failed)
                }
            })
        })
        .await
    }

    /// Recover jobs stuck in processing past the orphan threshold.
    ///
    /// Jobs out of attempts are failed together with their documents; the
    /// rest are reset to pending with scheduled_at = now + 2^attempts × 5 s.
    /// Returns the number of jobs processed.
    pub async fn cleanup_orphaned_jobs(&self, threshold: Duration) -> Result<usize> {
        let now = Utc::now();
        let cutoff =
            now - chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::minutes(5));

        // (job id, document id, attempts, max_attempts)
        let orphans: Vec<(String, String, i64, i64)> = {
            let conn = self.store.connect()?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, document_id, attempts, max_attempts FROM jobs
                WHERE status = 'processing' AND started_at IS NOT NULL AND started_at < ?1
                "#,
            )?;
            let result = stmt.query_map(params![fmt_ts(cutoff)], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        if orphans.is_empty() {
            return Ok(0);
        }

        let (to_fail, to_reset): (Vec<_>, Vec<_>) = orphans
            .into_iter()
            .partition(|(_, _, attempts, max_attempts)| attempts >= max_attempts);

        if !to_fail.is_empty() {
            let job_ids: Vec<&str> = to_fail.iter().map(|(id, _, _, _)| id.as_str()).collect();
            let doc_ids: Vec<&str> = to_fail.iter().map(|(_, d, _, _)| d.as_str()).collect();
            let now_str = fmt_ts(now);
            let marks = vec!["?"; to_fail.len()].join(",");

            super::with_retry("fail_orphaned_jobs", || {
                let conn = self.store.connect()?;
                immediate_tx(&conn, |conn| {
                    let sql = format!(
                        "UPDATE jobs SET status = 'failed', completed_at = ?, worker_id = NULL, error = ? \
                         WHERE id IN ({marks}) AND status = 'processing'"
                    );
                    let mut args: Vec<&dyn rusqlite::ToSql> = vec![&now_str, &ORPHAN_ERROR];
                    args.extend(job_ids.iter().map(|id| id as &dyn rusqlite::ToSql));
                    conn.execute(&sql, &args[..])?;

                    let sql = format!(
                        "UPDATE documents SET status = 'failed', error = ? \
                         WHERE id IN ({marks}) AND status IN ('pending', 'processing')"
                    );
                    let mut args: Vec<&dyn rusqlite::ToSql> = vec![&ORPHAN_ERROR];
                    args.extend(doc_ids.iter().map(|id| id as &dyn rusqlite::ToSql));
                    conn.execute(&sql, &args[..])?;
                    Ok(())
                })
            })
            .await?;

            // Recompute progress for every batch that lost a document.
            let batch_ids: Vec<String> = {
                let conn = self.store.connect()?;
                let sql = format!(
                    "SELECT DISTINCT batch_id FROM documents WHERE id IN ({marks}) AND batch_id IS NOT NULL"
                );
                let mut stmt = conn.prepare(&sql)?;
                let result = stmt
                    .query_map(params_from_iter(doc_ids.iter()), |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            };
            let batches = self.store.batches();
            for batch_id in batch_ids {
                batches.update_batch_progress(&batch_id).await?;
            }
        }

        if !to_reset.is_empty() {
            super::with_retry("reset_orphaned_jobs", || {
                let conn = self.store.connect()?;
                immediate_tx(&conn, |conn| {
                    for (job_id, _, attempts, _) in &to_reset {
                        let next = now + orphan_requeue_backoff(*attempts);
                        conn.execute(
                            r#"
                            UPDATE jobs
                            SET status = 'pending', worker_id = NULL, started_at = NULL,
                                scheduled_at = ?2
                            WHERE id = ?1 AND status = 'processing'
                            "#,
                            params![job_id, fmt_ts(next)],
                        )?;
                    }
                    Ok(())
                })
            })
            .await?;
        }

        let processed = to_fail.len() + to_reset.len();
        tracing::info!(
            failed = to_fail.len(),
            reset = to_reset.len(),
            "orphan sweep recovered stuck jobs"
        );
        Ok(processed)
    }

    /// Enqueue archive jobs for completed documents past their retention
    /// window. Returns the number of jobs created.
    pub async fn archive_old_documents(&self) -> Result<usize> {
        let ids = self.store.documents().archivable_ids()?;
        let count = ids.len();
        for document_id in ids {
            self.create_job(NewJob::archive(document_id)).await?;
        }
        if count > 0 {
            tracing::info!(count, "enqueued archive jobs for expired documents");
        }
        Ok(count)
    }

    /// Job counts grouped by status.
    pub fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.store.connect()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewDocument;
    use crate::store::StoreOptions;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&StoreOptions {
            path: dir.path().join("service.db"),
            ..Default::default()
        })
        .unwrap();
        (dir, store)
    }

    async fn seeded_job(store: &Store) -> Job {
        let doc = store
            .documents()
            .create(NewDocument {
                file_name: "a.pdf".into(),
                blob_key: Some("documents/a.pdf".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .queue()
            .create_job(NewJob::convert(doc.id))
            .await
            .unwrap()
    }

    #[test]
    fn test_backoff_ladders() {
        assert_eq!(retry_backoff(1), Duration::from_secs(120));
        assert_eq!(retry_backoff(2), Duration::from_secs(240));
        assert_eq!(orphan_requeue_backoff(1), Duration::from_secs(10));
        assert_eq!(orphan_requeue_backoff(2), Duration::from_secs(20));
        // Backoff is monotonic in attempts
        for n in 0..10 {
            assert!(retry_backoff(n + 1) > retry_backoff(n));
        }
    }

    #[tokio::test]
    async fn test_claim_increments_attempts_once() {
        let (_dir, store) = temp_store().await;
        let job = seeded_job(&store).await;
        assert_eq!(job.attempts, 0);

        let claimed = store.queue().claim_next_job("w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
        assert!(claimed.started_at.is_some());

        // Queue is now empty for claimers
        assert!(store.queue().claim_next_job("w2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_empty_queue_is_none() {
        let (_dir, store) = temp_store().await;
        assert!(store.queue().claim_next_job("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_priority_then_schedule() {
        let (_dir, store) = temp_store().await;
        let queue = store.queue();
        let docs = store.documents();

        let mk = |name: &str| NewDocument {
            file_name: name.into(),
            ..Default::default()
        };
        let d1 = docs.create(mk("low")).await.unwrap();
        let d2 = docs.create(mk("high")).await.unwrap();
        let d3 = docs.create(mk("early-high")).await.unwrap();

        let early = Utc::now() - chrono::Duration::seconds(60);
        queue
            .create_job(NewJob::convert(d1.id.clone()).with_priority(1))
            .await
            .unwrap();
        queue
            .create_job(NewJob::convert(d2.id.clone()).with_priority(5))
            .await
            .unwrap();
        let mut j3 = NewJob::convert(d3.id.clone()).with_priority(5);
        j3.scheduled_at = Some(early);
        queue.create_job(j3).await.unwrap();

        // Highest priority first; among equals, earliest scheduled_at
        let first = queue.claim_next_job("w").await.unwrap().unwrap();
        assert_eq!(first.document_id, d3.id);
        let second = queue.claim_next_job("w").await.unwrap().unwrap();
        assert_eq!(second.document_id, d2.id);
        let third = queue.claim_next_job("w").await.unwrap().unwrap();
        assert_eq!(third.document_id, d1.id);
    }

    #[tokio::test]
    async fn test_future_scheduled_jobs_are_not_claimable() {
        let (_dir, store) = temp_store().await;
        let doc = store
            .documents()
            .create(NewDocument {
                file_name: "later.pdf".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut new_job = NewJob::convert(doc.id);
        new_job.scheduled_at = Some(Utc::now() + chrono::Duration::seconds(120));
        store.queue().create_job(new_job).await.unwrap();

        assert!(store.queue().claim_next_job("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_job_reschedules_then_goes_terminal() {
        let (_dir, store) = temp_store().await;
        let queue = store.queue();
        seeded_job(&store).await;

        // Attempt 1 fails: back to pending, +120s
        let before = Utc::now();
        let claimed = queue.claim_next_job("w").await.unwrap().unwrap();
        let status = queue.fail_job(&claimed.id, "provider timeout").await.unwrap();
        assert_eq!(status, JobStatus::Pending);

        let job = queue.get(&claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("provider timeout"));
        assert!(job.started_at.is_none());
        assert!(job.worker_id.is_none());
        let delay = job.scheduled_at - before;
        assert!(delay >= chrono::Duration::seconds(119), "delay was {delay}");
        assert!(delay <= chrono::Duration::seconds(121), "delay was {delay}");

        // Make it claimable again and fail attempt 2: +240s
        force_due(&store, &claimed.id);
        let before = Utc::now();
        queue.claim_next_job("w").await.unwrap().unwrap();
        assert_eq!(
            queue.fail_job(&claimed.id, "provider timeout").await.unwrap(),
            JobStatus::Pending
        );
        let job = queue.get(&claimed.id).unwrap().unwrap();
        let delay = job.scheduled_at - before;
        assert!(delay >= chrono::Duration::seconds(239), "delay was {delay}");

        // Third failure exhausts attempts
        force_due(&store, &claimed.id);
        queue.claim_next_job("w").await.unwrap().unwrap();
        assert_eq!(
            queue.fail_job(&claimed.id, "provider timeout").await.unwrap(),
            JobStatus::Failed
        );
        let job = queue.get(&claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.completed_at.is_some());

        // Terminal stickiness: another failure report changes nothing
        assert_eq!(
            queue.fail_job(&claimed.id, "late error").await.unwrap(),
            JobStatus::Failed
        );
        let job = queue.get(&claimed.id).unwrap().unwrap();
        assert_eq!(job.error.as_deref(), Some("provider timeout"));
    }

    #[tokio::test]
    async fn test_complete_job_and_document_co_commit() {
        let (_dir, store) = temp_store().await;
        let queue = store.queue();
        let job = seeded_job(&store).await;
        let claimed = queue.claim_next_job("w").await.unwrap().unwrap();
        store
            .documents()
            .mark_processing(&claimed.document_id)
            .await
            .unwrap();

        queue
            .complete_job_and_document(
                &job.id,
                &claimed.document_id,
                &JobOutcome::Completed {
                    result: Some(serde_json::json!({"pages": 2})),
                    content: "# Converted".into(),
                    metadata: serde_json::json!({"model": "test-ocr"}),
                },
            )
            .await
            .unwrap();

        let job = queue.get(&job.id).unwrap().unwrap();
        let doc = store.documents().get(&claimed.document_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(doc.status, crate::models::DocumentStatus::Completed);
        assert_eq!(doc.content.as_deref(), Some("# Converted"));
        assert!(doc.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_resets_young_attempts_and_fails_exhausted() {
        let (_dir, store) = temp_store().await;
        let queue = store.queue();

        let j1 = seeded_job(&store).await; // will have attempts=1 → reset
        let j2 = seeded_job(&store).await; // will be forced to attempts=3 → fail

        queue.claim_next_job("w1").await.unwrap().unwrap();
        queue.claim_next_job("w2").await.unwrap().unwrap();

        // Simulate a worker death 10 minutes ago
        let stale = fmt_ts(Utc::now() - chrono::Duration::minutes(10));
        {
            let conn = store.connect().unwrap();
            conn.execute(
                "UPDATE jobs SET started_at = ?1 WHERE id IN (?2, ?3)",
                params![stale, j1.id, j2.id],
            )
            .unwrap();
            conn.execute("UPDATE jobs SET attempts = 3 WHERE id = ?1", params![j2.id])
                .unwrap();
        }

        let processed = queue
            .cleanup_orphaned_jobs(Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(processed, 2);

        let reset = queue.get(&j1.id).unwrap().unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert!(reset.worker_id.is_none());
        assert!(reset.started_at.is_none());
        // attempts=1 → scheduled 10s out
        assert!(reset.scheduled_at > Utc::now() + chrono::Duration::seconds(8));

        let failed = queue.get(&j2.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.worker_id.is_none());
        assert_eq!(failed.error.as_deref(), Some(ORPHAN_ERROR));
        let doc = store.documents().get(&failed.document_id).unwrap().unwrap();
        assert_eq!(doc.status, crate::models::DocumentStatus::Failed);
        assert_eq!(doc.error.as_deref(), Some(ORPHAN_ERROR));
    }

    #[tokio::test]
    async fn test_cleanup_ignores_fresh_processing_jobs() {
        let (_dir, store) = temp_store().await;
        let queue = store.queue();
        seeded_job(&store).await;
        queue.claim_next_job("w1").await.unwrap().unwrap();

        let processed = queue
            .cleanup_orphaned_jobs(Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn test_complete_archive_job_requires_completed_document() {
        let (_dir, store) = temp_store().await;
        let queue = store.queue();
        seeded_job(&store).await;

        // Claim but do not complete: the document is still pending
        let claimed = queue.claim_next_job("w").await.unwrap().unwrap();
        let err = queue
            .complete_archive_job(&claimed.id, &claimed.document_id, &serde_json::json!({}), None)
            .await;
        assert!(matches!(err, Err(StoreError::Invalid(_))));

        // The rollback left the job untouched
        let job = queue.get(&claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_archive_old_documents_enqueues_once() {
        let (_dir, store) = temp_store().await;
        let queue = store.queue();
        let job = seeded_job(&store).await;

        // Complete the document, then age it past retention
        let claimed = queue.claim_next_job("w").await.unwrap().unwrap();
        queue
            .complete_job_and_document(
                &claimed.id,
                &claimed.document_id,
                &JobOutcome::Completed {
                    result: None,
                    content: "# md".into(),
                    metadata: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        {
            let conn = store.connect().unwrap();
            let old = fmt_ts(Utc::now() - chrono::Duration::days(60));
            conn.execute(
                "UPDATE documents SET created_at = ?1 WHERE id = ?2",
                params![old, job.document_id],
            )
            .unwrap();
        }

        assert_eq!(queue.archive_old_documents().await.unwrap(), 1);
        // Second sweep sees the pending archive job and stays quiet
        assert_eq!(queue.archive_old_documents().await.unwrap(), 0);
    }

    fn force_due(store: &Store, job_id: &str) {
        let conn = store.connect().unwrap();
        conn.execute(
            "UPDATE jobs SET scheduled_at = ?1 WHERE id = ?2",
            params![fmt_ts(Utc::now() - chrono::Duration::seconds(1)), job_id],
        )
        .unwrap();
    }
}
