//! Blob storage collaborator.
//!
//! Workers consume this narrow contract; the engine never assumes anything
//! about the backend beyond it. Multipart upload thresholds and transfer
//! tuning are backend concerns.

mod local;

pub use local::LocalBlobStore;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Blob backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Metadata for a stored blob.
#[derive(Debug, Clone)]
pub struct BlobStat {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub mime: Option<String>,
}

/// Options for [`BlobStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub mime: Option<String>,
    pub acl: Option<String>,
}

/// HTTP method a presigned URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

/// Options for [`BlobStore::presign`].
#[derive(Debug, Clone)]
pub struct PresignOptions {
    pub method: PresignMethod,
    pub expires_secs: u64,
    pub mime: Option<String>,
}

/// Contract for blob fetch/put/stat/archive, consumed by workers and the
/// submission API.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Metadata for a key, or [`BlobError::NotFound`].
    async fn stat(&self, key: &str) -> Result<BlobStat>;

    /// Fetch a blob fully into memory.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Stream a blob to a local path (large objects).
    async fn get_stream(&self, key: &str, path: &Path) -> Result<u64>;

    /// Store a blob.
    async fn put(&self, key: &str, data: &[u8], options: &PutOptions) -> Result<()>;

    /// Server-side copy.
    async fn copy(&self, src: &str, dst: &str) -> Result<()>;

    /// Delete a key; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Presigned URL for direct client access.
    async fn presign(&self, key: &str, options: &PresignOptions) -> Result<String>;
}

/// Rewrite an original blob key to its archive location.
///
/// `documents/` → `archive/` is a convention of the blob layout, not a
/// guarantee; keys without the prefix are nested under `archive/` whole.
pub fn archive_key(key: &str) -> String {
    if let Some(rest) = key.strip_prefix("documents/") {
        format!("archive/{}", rest)
    } else {
        format!("archive/{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_key_rewrites_prefix() {
        assert_eq!(archive_key("documents/a/b.pdf"), "archive/a/b.pdf");
    }

    #[test]
    fn test_archive_key_without_prefix_nests() {
        assert_eq!(archive_key("uploads/b.pdf"), "archive/uploads/b.pdf");
    }
}
