//! Document persistence.

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{fmt_ts, parse_datetime, parse_datetime_opt, to_option, Result, Store, StoreError};
use crate::models::{Document, DocumentStatus, NewDocument, RETENTION_DAYS_RANGE};

pub(crate) fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let metadata: String = row.get("metadata")?;
    let status: String = row.get("status")?;
    Ok(Document {
        id: row.get("id")?,
        file_name: row.get("file_name")?,
        mime_type: row.get("mime_type")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        blob_key: row.get("blob_key")?,
        content: row.get("content")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        status: DocumentStatus::from_str(&status).unwrap_or(DocumentStatus::Failed),
        error: row.get("error")?,
        retention_days: row.get("retention_days")?,
        user_id: row.get("user_id")?,
        api_key_id: row.get("api_key_id")?,
        batch_id: row.get("batch_id")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        processed_at: parse_datetime_opt(row.get("processed_at")?),
        archived_at: parse_datetime_opt(row.get("archived_at")?),
    })
}

/// SQLite-backed repository for documents.
pub struct DocumentRepository {
    store: Store,
}

impl DocumentRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a document in pending status. The id is assigned here.
    pub async fn create(&self, params_in: NewDocument) -> Result<Document> {
        if !RETENTION_DAYS_RANGE.contains(&params_in.retention_days) {
            return Err(StoreError::Invalid(format!(
                "retention_days must be within {}..={}, got {}",
                RETENTION_DAYS_RANGE.start(),
                RETENTION_DAYS_RANGE.end(),
                params_in.retention_days
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        super::with_retry("create_document", || {
            let conn = self.store.connect()?;
            conn.execute(
                r#"
                INSERT INTO documents (
                    id, file_name, mime_type, file_size, blob_key, metadata,
                    status, retention_days, user_id, api_key_id, batch_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    id,
                    params_in.file_name,
                    params_in.mime_type,
                    params_in.file_size as i64,
                    params_in.blob_key,
                    serde_json::to_string(&params_in.metadata)?,
                    DocumentStatus::Pending.as_str(),
                    params_in.retention_days,
                    params_in.user_id,
                    params_in.api_key_id,
                    params_in.batch_id,
                    fmt_ts(now),
                ],
            )?;
            Ok(())
        })
        .await?;

        self.get(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))
    }

    /// Get a document by id. Hot path: the statement is cached per connection.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare_cached("SELECT * FROM documents WHERE id = ?")?;
        to_option(stmt.query_row(params![id], row_to_document))
    }

    /// Get all documents belonging to a batch.
    pub fn get_by_batch(&self, batch_id: &str) -> Result<Vec<Document>> {
        let conn = self.store.connect()?;
        let mut stmt = conn
            .prepare("SELECT * FROM documents WHERE batch_id = ? ORDER BY created_at ASC")?;
        let docs = stmt
            .query_map(params![batch_id], row_to_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    /// Mark a document as picked up by a conversion worker.
    ///
    /// Idempotent across retries of the same job; terminal rows are left
    /// untouched.
    pub async fn mark_processing(&self, id: &str) -> Result<()> {
        super::with_retry("mark_document_processing", || {
            let conn = self.store.connect()?;
            conn.execute(
                "UPDATE documents SET status = 'processing' WHERE id = ? AND status IN ('pending', 'processing')",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    /// Best-effort failure write; never overwrites a terminal status.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        super::with_retry("mark_document_failed", || {
            let conn = self.store.connect()?;
            conn.execute(
                "UPDATE documents SET status = 'failed', error = ?2 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![id, error],
            )?;
            Ok(())
        })
        .await
    }

    /// Completed documents past their retention window that have no archive
    /// job yet.
    pub fn archivable_ids(&self) -> Result<Vec<String>> {
        let conn = self.store.connect()?;
        let now = Utc::now();
        let mut stmt = conn.prepare(
            r#"
            SELECT d.id FROM documents d
            WHERE d.status = 'completed'
            AND strftime('%s', d.created_at) + d.retention_days * 86400 <= strftime('%s', ?1)
            AND NOT EXISTS (
                SELECT 1 FROM jobs j
                WHERE j.document_id = d.id
                AND j.job_type = 'archive'
                AND j.status IN ('pending', 'processing')
            )
            ORDER BY d.created_at ASC
            "#,
        )?;
        let ids = stmt
            .query_map(params![fmt_ts(now)], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Document counts grouped by status.
    pub fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.store.connect()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;

    async fn temp_repo() -> (tempfile::TempDir, DocumentRepository) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&StoreOptions {
            path: dir.path().join("service.db"),
            ..Default::default()
        })
        .unwrap();
        (dir, store.documents())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_dir, repo) = temp_repo().await;
        let doc = repo
            .create(NewDocument {
                file_name: "report.pdf".into(),
                mime_type: "application/pdf".into(),
                file_size: 1024,
                blob_key: Some("documents/report.pdf".into()),
                metadata: serde_json::json!({"source": "upload"}),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.content.is_none());

        let loaded = repo.get(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.file_name, "report.pdf");
        assert_eq!(loaded.metadata["source"], "upload");
    }

    #[tokio::test]
    async fn test_metadata_round_trips_verbatim() {
        let (_dir, repo) = temp_repo().await;
        let metadata = serde_json::json!({
            "nested": {"k": [1, 2, 3]},
            "unicode": "héllo",
            "flag": true,
        });
        let doc = repo
            .create(NewDocument {
                file_name: "m.pdf".into(),
                metadata: metadata.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(repo.get(&doc.id).unwrap().unwrap().metadata, metadata);
    }

    #[tokio::test]
    async fn test_retention_bounds() {
        let (_dir, repo) = temp_repo().await;
        for bad in [0, 3651, -5] {
            let err = repo
                .create(NewDocument {
                    file_name: "x".into(),
                    retention_days: bad,
                    ..Default::default()
                })
                .await;
            assert!(matches!(err, Err(StoreError::Invalid(_))));
        }
    }

    #[tokio::test]
    async fn test_mark_failed_does_not_touch_terminal() {
        let (_dir, repo) = temp_repo().await;
        let doc = repo
            .create(NewDocument {
                file_name: "a".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.mark_processing(&doc.id).await.unwrap();
        repo.mark_failed(&doc.id, "boom").await.unwrap();

        let loaded = repo.get(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));

        // A second failure write must not change anything
        repo.mark_failed(&doc.id, "other").await.unwrap();
        let loaded = repo.get(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.error.as_deref(), Some("boom"));
    }

}
