//! Filesystem-backed blob store.
//!
//! Keys map to relative paths under a root directory. Writes go through a
//! sibling temp file and a rename, so readers never observe partial blobs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use super::{BlobError, BlobStat, BlobStore, PresignOptions, PutOptions, Result};

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve a key to a path, rejecting traversal outside the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part == ".") {
            return Err(BlobError::Backend(format!("invalid blob key '{}'", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn stat(&self, key: &str) -> Result<BlobStat> {
        let path = self.resolve(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let last_modified = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t));
        let etag = last_modified
            .map(|m| format!("{:x}-{:x}", meta.len(), m.timestamp_millis()));
        Ok(BlobStat {
            size: meta.len(),
            last_modified,
            etag,
            mime: mime_guess::from_path(&path)
                .first()
                .map(|m| m.essence_str().to_string()),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_stream(&self, key: &str, dest: &Path) -> Result<u64> {
        let path = self.resolve(key)?;
        let mut src = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut out = tokio::fs::File::create(dest).await?;
        let copied = tokio::io::copy(&mut src, &mut out).await?;
        out.flush().await?;
        Ok(copied)
    }

    async fn put(&self, key: &str, data: &[u8], _options: &PutOptions) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.resolve(src)?;
        let dst_path = self.resolve(dst)?;
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&src_path, &dst_path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(src.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn presign(&self, key: &str, options: &PresignOptions) -> Result<String> {
        // Local files carry no signature; the expiry is recorded in the URL
        // for parity with remote backends but not enforced.
        let path = self.resolve(key)?;
        Ok(format!(
            "file://{}?expires={}",
            path.display(),
            options.expires_secs
        ))
    }
}
