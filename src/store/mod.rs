//! Store layer: a single-file SQLite database shared by the submission API,
//! the workers, and the cleanup sweeps.
//!
//! SQLite has one writer at a time; the API, the workers, and cleanup all
//! produce small write bursts that routinely collide. Every write therefore
//! goes through [`with_retry`], and multi-row updates run inside IMMEDIATE
//! transactions.

mod batch;
mod document;
mod migrations;
mod queue;
mod usage;

pub use batch::{BatchRepository, NewBatch};
pub use document::DocumentRepository;
pub use queue::{orphan_requeue_backoff, retry_backoff, JobOutcome, NewJob, QueueRepository};
pub use usage::UsageRepository;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Default database filename under the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "service.db";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("Store busy, giving up on operation '{operation}'")]
    OperationBusy { operation: &'static str },
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Format a timestamp for storage. Fixed millisecond precision keeps the
/// text column lexicographically ordered by time.
pub fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Convert a rusqlite Result<T> to Result<Option<T>>, treating QueryReturnedNoRows as None.
pub fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Create a database connection with settings tuned for many small writers.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // WAL mode persists, so this is effectively a one-time setting per database
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        PRAGMA temp_store = MEMORY;
    "#,
    )?;

    Ok(conn)
}

/// Run a closure inside an IMMEDIATE transaction.
///
/// IMMEDIATE takes the write lock up front, so two concurrent claims
/// serialize instead of both reading the same pending row.
pub fn immediate_tx<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

fn is_busy_error(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    ) || e.to_string().contains("database is locked")
}

/// Execute a write operation with bounded retry on lock contention.
///
/// Retries up to 5 times with exponential backoff (100ms, 200ms, 400ms,
/// 800ms, 1600ms). Only busy/locked errors are retried; anything else
/// propagates on the first attempt. Exhausting the budget surfaces as
/// [`StoreError::OperationBusy`] tagged with the operation name.
pub async fn with_retry<T, F>(operation: &'static str, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    const MAX_RETRIES: u32 = 5;
    let mut delay_ms = 100;

    for attempt in 0..MAX_RETRIES {
        match f() {
            Ok(value) => return Ok(value),
            Err(StoreError::Database(ref e)) if is_busy_error(e) => {
                if attempt + 1 == MAX_RETRIES {
                    tracing::warn!(
                        operation,
                        attempts = MAX_RETRIES,
                        "database still locked, giving up"
                    );
                    return Err(StoreError::OperationBusy { operation });
                }
                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms,
                    "database locked, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::OperationBusy { operation })
}

/// Recognized store options. Only the local path is acted on here; the
/// remote-sync and encryption options are accepted for config compatibility
/// and logged when set.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub sync_url: Option<String>,
    pub auth_token: Option<String>,
    pub sync_interval_secs: Option<u64>,
    pub encryption_key: Option<String>,
    pub use_replica: bool,
}

/// Handle to the backing database file.
///
/// Connections are opened per call, matching SQLite's cheap-open model; the
/// busy timeout plus [`with_retry`] absorb writer collisions.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open the store, creating the parent directory and applying migrations.
    /// A persistent open failure is fatal to startup.
    pub fn open(options: &StoreOptions) -> Result<Self> {
        if let Some(parent) = options.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Migration(format!(
                    "cannot create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        if options.sync_url.is_some() || options.use_replica {
            tracing::info!(
                sync_url = options.sync_url.as_deref().unwrap_or(""),
                use_replica = options.use_replica,
                "remote sync options are recognized but this store only writes locally"
            );
        }

        let store = Self {
            db_path: options.path.clone(),
        };
        let conn = store.connect()?;
        migrations::migrate(&conn)?;
        Ok(store)
    }

    pub fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.clone())
    }

    pub fn queue(&self) -> QueueRepository {
        QueueRepository::new(self.clone())
    }

    pub fn batches(&self) -> BatchRepository {
        BatchRepository::new(self.clone())
    }

    pub fn usage(&self) -> UsageRepository {
        UsageRepository::new(self.clone())
    }
}
