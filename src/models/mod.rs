//! Domain models for documents, jobs, batches, and usage accounting.

mod batch;
mod document;
mod job;
mod usage;

pub use batch::{derive_batch_status, Batch, BatchStatus};
pub use document::{Document, DocumentStatus, NewDocument, RETENTION_DAYS_RANGE};
pub use job::{Job, JobStatus, JobType, DEFAULT_MAX_ATTEMPTS};
pub use usage::{ConversionCost, UsageRecord, DEFAULT_MARGIN_PERCENT};
