//! Worker: a single-threaded execution unit owning one job at a time.
//!
//! The run-loop claims, executes, and reports; every path out of a handler
//! ends in either a terminal write or a failure report that the queue turns
//! into a retry. Errors never escape the loop. Cancellation is cooperative:
//! the drain flag is checked before each claim and between suspension
//! points, and in-flight I/O is never aborted mid-call.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::EngineContext;
use crate::blobs::{archive_key, BlobError};
use crate::models::{ConversionCost, Job, JobStatus, JobType, UsageRecord, DEFAULT_MARGIN_PERCENT};
use crate::ocr::OcrError;
use crate::store::{JobOutcome, StoreError};

/// Messages a worker accepts from the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// The queue has due work; wake up and drain it.
    Drain,
    /// Shut down after the current job.
    Stop,
}

/// How a handler failed.
#[derive(Debug)]
pub enum WorkerError {
    /// The job can never succeed; fail it and its document now, regardless
    /// of remaining attempts.
    Terminal(String),
    /// External or transient failure; the queue decides retry vs terminal.
    Retryable(String),
    /// Drain observed at a suspension point. Not an error: the job row is
    /// left processing for the next orphan sweep.
    Shutdown,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal(msg) | Self::Retryable(msg) => write!(f, "{}", msg),
            Self::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

impl From<StoreError> for WorkerError {
    fn from(e: StoreError) -> Self {
        Self::Retryable(e.to_string())
    }
}

impl From<BlobError> for WorkerError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(_) => Self::Terminal(e.to_string()),
            other => Self::Retryable(other.to_string()),
        }
    }
}

impl From<OcrError> for WorkerError {
    fn from(e: OcrError) -> Self {
        Self::Retryable(e.to_string())
    }
}

/// Scratch file for streaming large blobs; removed on every exit path.
struct TempBlob {
    path: PathBuf,
}

impl TempBlob {
    fn new(tmp_dir: &std::path::Path, document_id: &str) -> Self {
        let name = format!("{}-{}.tmp", document_id, Utc::now().timestamp_millis());
        Self {
            path: tmp_dir.join(name),
        }
    }

    fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for TempBlob {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to remove scratch file: {}", e);
            }
        }
    }
}

pub struct Worker {
    id: String,
    ctx: EngineContext,
    signals: mpsc::Receiver<WorkerSignal>,
}

impl Worker {
    pub fn new(id: String, ctx: EngineContext, signals: mpsc::Receiver<WorkerSignal>) -> Self {
        Self { id, ctx, signals }
    }

    /// Claim-execute loop. Runs until a stop signal or the drain flag.
    pub async fn run(mut self) {
        info!(worker = %self.id, "worker started");
        loop {
            if self.ctx.draining.load(Ordering::SeqCst) {
                break;
            }
            match self.claim_and_execute().await {
                // Did work; immediately look for the next job.
                true => continue,
                // Queue empty (or store busy): suspend until signaled.
                false => match self.signals.recv().await {
                    Some(WorkerSignal::Drain) => continue,
                    Some(WorkerSignal::Stop) | None => break,
                },
            }
        }
        info!(worker = %self.id, "worker stopped");
    }

    /// Claim one job and run it to a recorded outcome. Returns false when
    /// there was nothing to do.
    async fn claim_and_execute(&self) -> bool {
        let queue = self.ctx.store.queue();
        let job = match queue.claim_next_job(&self.id).await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                // Treat a busy store as an empty tick; the dispatch timer
                // will signal again.
                warn!(worker = %self.id, "claim failed: {}", e);
                return false;
            }
        };

        info!(
            worker = %self.id,
            job = %job.id,
            document = %job.document_id,
            job_type = job.job_type.as_str(),
            attempt = job.attempts,
            "claimed job"
        );

        let result = AssertUnwindSafe(self.handle(&job)).catch_unwind().await;
        match result {
            Ok(Ok(())) => {
                info!(worker = %self.id, job = %job.id, "job completed");
            }
            Ok(Err(e)) => self.record_failure(&job, e).await,
            Err(_) => {
                self.record_failure(
                    &job,
                    WorkerError::Retryable("internal worker error".to_string()),
                )
                .await
            }
        }
        true
    }

    /// Bail out between suspension points once the drain flag is set.
    fn checkpoint(&self) -> Result<(), WorkerError> {
        if self.ctx.draining.load(Ordering::SeqCst) {
            Err(WorkerError::Shutdown)
        } else {
            Ok(())
        }
    }

    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        match job.job_type {
            JobType::Convert => self.handle_convert(job).await,
            JobType::Archive => self.handle_archive(job).await,
        }
    }

    async fn handle_convert(&self, job: &Job) -> Result<(), WorkerError> {
        let started = Instant::now();
        let documents = self.ctx.store.documents();

        let doc = documents
            .get(&job.document_id)?
            .ok_or_else(|| {
                WorkerError::Terminal(format!("document {} not found", job.document_id))
            })?;
        let blob_key = doc.blob_key.clone().ok_or_else(|| {
            WorkerError::Terminal(format!("document {} has no blob key", doc.id))
        })?;

        documents.mark_processing(&doc.id).await?;
        self.checkpoint()?;

        let stat = self.ctx.blobs.stat(&blob_key).await?;
        self.checkpoint()?;

        let large = stat.size > self.ctx.settings.large_file_threshold;
        let data = if large {
            // Stream to a worker-local scratch file, then read it back; the
            // guard removes the file on every exit path.
            let tmp = TempBlob::new(&self.ctx.settings.tmp_dir(), &doc.id);
            self.ctx.blobs.get_stream(&blob_key, tmp.path()).await?;
            self.checkpoint()?;
            tokio::fs::read(tmp.path())
                .await
                .map_err(|e| WorkerError::Retryable(format!("scratch file read failed: {}", e)))?
        } else {
            self.ctx.blobs.get(&blob_key).await?
        };
        self.checkpoint()?;

        debug!(
            worker = %self.id,
            document = %doc.id,
            bytes = data.len(),
            used_temp = large,
            "invoking OCR provider"
        );
        // Past this point the expensive work is done: the outcome is
        // recorded even if a drain arrives while the call is in flight.
        let ocr = self
            .ctx
            .ocr
            .convert(&data, &doc.mime_type, &doc.file_name)
            .await?;
        drop(data);
        let processing_ms = started.elapsed().as_millis() as u64;

        let mut metadata = match doc.metadata.clone() {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => serde_json::json!({}),
        };
        metadata["model"] = serde_json::json!(ocr.model);
        metadata["extracted_pages"] = serde_json::json!(ocr.pages.len());
        metadata["processing_time_ms"] = serde_json::json!(processing_ms);
        metadata["blob_size"] = serde_json::json!(stat.size);
        metadata["used_temp"] = serde_json::json!(large);

        let queue = self.ctx.store.queue();
        queue
            .complete_job_and_document(
                &job.id,
                &doc.id,
                &JobOutcome::Completed {
                    result: Some(serde_json::json!({
                        "model": ocr.model,
                        "extracted_pages": ocr.pages.len(),
                        "total_tokens": ocr.tokens.total_tokens,
                    })),
                    content: ocr.markdown(),
                    metadata,
                },
            )
            .await?;

        // The terminal write above is authoritative; accounting and batch
        // bookkeeping failures are logged and swallowed.
        let cost = ConversionCost::from_tokens(ocr.tokens.total_tokens, DEFAULT_MARGIN_PERCENT);
        let record = UsageRecord {
            document_id: doc.id.clone(),
            operation: "convert".to_string(),
            input_tokens: ocr.tokens.prompt_tokens,
            output_tokens: ocr.tokens.completion_tokens,
            base_cost_cents: cost.base_cost_cents,
            margin_percent: cost.margin_percent,
            total_cost_cents: cost.total_cost_cents,
            created_at: Utc::now(),
        };
        if let Err(e) = self.ctx.store.usage().insert(&record).await {
            warn!(document = %doc.id, "usage record write failed: {}", e);
        }

        if let Some(ref batch_id) = doc.batch_id {
            self.refresh_batch(batch_id).await;
        }
        Ok(())
    }

    async fn handle_archive(&self, job: &Job) -> Result<(), WorkerError> {
        let documents = self.ctx.store.documents();
        let doc = documents
            .get(&job.document_id)?
            .ok_or_else(|| {
                WorkerError::Terminal(format!("document {} not found", job.document_id))
            })?;

        if doc.status != crate::models::DocumentStatus::Completed {
            return Err(WorkerError::Terminal(format!(
                "document {} is {}, only completed documents can be archived",
                doc.id,
                doc.status.as_str()
            )));
        }
        let original = doc.blob_key.clone().ok_or_else(|| {
            WorkerError::Terminal(format!("document {} has no blob key", doc.id))
        })?;
        let destination = archive_key(&original);

        // Once the move starts, finish it and record the outcome even if a
        // drain arrives mid-way.
        self.checkpoint()?;
        self.ctx.blobs.copy(&original, &destination).await?;
        self.ctx.blobs.delete(&original).await?;

        let mut metadata = match doc.metadata.clone() {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => serde_json::json!({}),
        };
        metadata["original_key"] = serde_json::json!(original);
        metadata["archive_key"] = serde_json::json!(destination);

        match self
            .ctx
            .store
            .queue()
            .complete_archive_job(
                &job.id,
                &doc.id,
                &metadata,
                Some(&serde_json::json!({"archive_key": destination})),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::Invalid(msg)) => Err(WorkerError::Terminal(msg)),
            Err(e) => Err(e.into()),
        }
    }

    /// Turn a handler error into the job's recorded outcome.
    async fn record_failure(&self, job: &Job, err: WorkerError) {
        let queue = self.ctx.store.queue();
        match err {
            WorkerError::Shutdown => {
                // Left in processing on purpose; the orphan sweep will
                // reschedule or fail it once the threshold passes.
                info!(worker = %self.id, job = %job.id, "job interrupted by shutdown");
            }
            WorkerError::Terminal(message) => {
                warn!(worker = %self.id, job = %job.id, "job failed terminally: {}", message);
                if let Err(e) = queue
                    .complete_job_and_document(
                        &job.id,
                        &job.document_id,
                        &JobOutcome::Failed {
                            error: message.clone(),
                        },
                    )
                    .await
                {
                    warn!(job = %job.id, "terminal failure write failed: {}", e);
                }
                self.refresh_batch_for_document(&job.document_id).await;
            }
            WorkerError::Retryable(message) => {
                warn!(worker = %self.id, job = %job.id, attempt = job.attempts, "job failed: {}", message);
                match queue.fail_job(&job.id, &message).await {
                    Ok(JobStatus::Failed) => {
                        // Out of attempts: surface the error on the document
                        // too, best effort.
                        if let Err(e) = self
                            .ctx
                            .store
                            .documents()
                            .mark_failed(&job.document_id, &message)
                            .await
                        {
                            warn!(document = %job.document_id, "document failure write failed: {}", e);
                        }
                        self.refresh_batch_for_document(&job.document_id).await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(job = %job.id, "failure write failed: {}", e),
                }
            }
        }
    }

    /// Best-effort batch recount after a terminal document event.
    async fn refresh_batch(&self, batch_id: &str) {
        if let Err(e) = self.ctx.store.batches().update_batch_progress(batch_id).await {
            warn!(batch = %batch_id, "batch progress update failed: {}", e);
        }
    }

    async fn refresh_batch_for_document(&self, document_id: &str) {
        let batch_id = match self.ctx.store.documents().get(document_id) {
            Ok(Some(doc)) => doc.batch_id,
            _ => None,
        };
        if let Some(batch_id) = batch_id {
            self.refresh_batch(&batch_id).await;
        }
    }
}
