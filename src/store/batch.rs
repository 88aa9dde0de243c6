//! Batch persistence and derived progress.

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{fmt_ts, immediate_tx, parse_datetime, parse_datetime_opt, to_option, Result, Store, StoreError};
use crate::models::{derive_batch_status, Batch, BatchStatus};

fn row_to_batch(row: &Row) -> rusqlite::Result<Batch> {
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;
    Ok(Batch {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        api_key_id: row.get("api_key_id")?,
        total_documents: row.get("total_documents")?,
        completed_documents: row.get("completed_documents")?,
        failed_documents: row.get("failed_documents")?,
        status: BatchStatus::from_str(&status).unwrap_or(BatchStatus::Pending),
        priority: row.get("priority")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        completed_at: parse_datetime_opt(row.get("completed_at")?),
    })
}

/// Parameters for creating a batch row.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub user_id: String,
    pub api_key_id: String,
    pub total_documents: i64,
    pub priority: i64,
    pub metadata: serde_json::Value,
}

/// SQLite-backed repository for batches.
pub struct BatchRepository {
    store: Store,
}

impl BatchRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a batch in pending status.
    pub async fn create(&self, new_batch: NewBatch) -> Result<Batch> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        super::with_retry("create_batch", || {
            let conn = self.store.connect()?;
            conn.execute(
                r#"
                INSERT INTO batches (
                    id, user_id, api_key_id, total_documents, status,
                    priority, metadata, created_at
                ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)
                "#,
                params![
                    id,
                    new_batch.user_id,
                    new_batch.api_key_id,
                    new_batch.total_documents,
                    new_batch.priority,
                    serde_json::to_string(&new_batch.metadata)?,
                    fmt_ts(now),
                ],
            )?;
            Ok(())
        })
        .await?;

        self.get(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", id)))
    }

    /// Get a batch by id.
    pub fn get(&self, id: &str) -> Result<Option<Batch>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare_cached("SELECT * FROM batches WHERE id = ?")?;
        to_option(stmt.query_row(params![id], row_to_batch))
    }

    /// List batches for a user, most recent first.
    pub fn list(&self, user_id: Option<&str>, limit: u32) -> Result<Vec<Batch>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM batches
            WHERE (?1 IS NULL OR user_id = ?1)
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )?;
        let batches = stmt
            .query_map(params![user_id, limit], row_to_batch)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    /// Recompute a batch's progress by recounting its child documents.
    ///
    /// Counts are derived, never incremented: each terminal child event
    /// triggers a full recount, so concurrent workers cannot drift the
    /// numbers. completed_at is stamped on the transition into a terminal
    /// status.
    pub async fn update_batch_progress(&self, batch_id: &str) -> Result<()> {
        let now = Utc::now();
        super::with_retry("update_batch_progress", || {
            let conn = self.store.connect()?;
            immediate_tx(&conn, |conn| {
                let row = to_option(conn.query_row(
                    "SELECT total_documents, status FROM batches WHERE id = ?",
                    params![batch_id],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                ))?;
                let Some((total, current_status)) = row else {
                    return Err(StoreError::NotFound(format!("batch {}", batch_id)));
                };

                let (completed, failed): (i64, i64) = conn.query_row(
                    r#"
                    SELECT
                        SUM(CASE WHEN status = 'completed' OR status = 'archived' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END)
                    FROM documents WHERE batch_id = ?
                    "#,
                    params![batch_id],
                    |row| {
                        Ok((
                            row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                            row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        ))
                    },
                )?;

                let new_status = derive_batch_status(completed, failed, total);
                let was_terminal = BatchStatus::from_str(&current_status)
                    .map(|s| s.is_terminal())
                    .unwrap_or(false);

                if new_status.is_terminal() && !was_terminal {
                    conn.execute(
                        r#"
                        UPDATE batches
                        SET completed_documents = ?2, failed_documents = ?3,
                            status = ?4, completed_at = ?5
                        WHERE id = ?1
                        "#,
                        params![batch_id, completed, failed, new_status.as_str(), fmt_ts(now)],
                    )?;
                } else {
                    conn.execute(
                        r#"
                        UPDATE batches
                        SET completed_documents = ?2, failed_documents = ?3, status = ?4
                        WHERE id = ?1
                        "#,
                        params![batch_id, completed, failed, new_status.as_str()],
                    )?;
                }
                Ok(())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, NewDocument};
    use crate::store::StoreOptions;

    async fn store_with_batch(total: i64) -> (tempfile::TempDir, Store, Batch, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&StoreOptions {
            path: dir.path().join("service.db"),
            ..Default::default()
        })
        .unwrap();
        let batch = store
            .batches()
            .create(NewBatch {
                user_id: "u1".into(),
                api_key_id: "k1".into(),
                total_documents: total,
                priority: 0,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        let mut doc_ids = Vec::new();
        for i in 0..total {
            let doc = store
                .documents()
                .create(NewDocument {
                    file_name: format!("doc-{i}.pdf"),
                    batch_id: Some(batch.id.clone()),
                    ..Default::default()
                })
                .await
                .unwrap();
            doc_ids.push(doc.id);
        }
        (dir, store, batch, doc_ids)
    }

    async fn set_doc_status(store: &Store, id: &str, status: DocumentStatus) {
        let conn = store.connect().unwrap();
        conn.execute(
            "UPDATE documents SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_progress_timeline() {
        let (_dir, store, batch, docs) = store_with_batch(3).await;
        let batches = store.batches();

        assert_eq!(batches.get(&batch.id).unwrap().unwrap().status, BatchStatus::Pending);

        // D1 completes
        set_doc_status(&store, &docs[0], DocumentStatus::Completed).await;
        batches.update_batch_progress(&batch.id).await.unwrap();
        let b = batches.get(&batch.id).unwrap().unwrap();
        assert_eq!(b.status, BatchStatus::Processing);
        assert_eq!((b.completed_documents, b.failed_documents), (1, 0));

        // D2 fails terminally
        set_doc_status(&store, &docs[1], DocumentStatus::Failed).await;
        batches.update_batch_progress(&batch.id).await.unwrap();
        let b = batches.get(&batch.id).unwrap().unwrap();
        assert_eq!(b.status, BatchStatus::Processing);
        assert_eq!((b.completed_documents, b.failed_documents), (1, 1));
        assert!(b.completed_at.is_none());

        // D3 completes → terminal completed since failed < total
        set_doc_status(&store, &docs[2], DocumentStatus::Completed).await;
        batches.update_batch_progress(&batch.id).await.unwrap();
        let b = batches.get(&batch.id).unwrap().unwrap();
        assert_eq!(b.status, BatchStatus::Completed);
        assert_eq!((b.completed_documents, b.failed_documents), (2, 1));
        assert!(b.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_all_failed_batch_is_failed() {
        let (_dir, store, batch, docs) = store_with_batch(2).await;
        for id in &docs {
            set_doc_status(&store, id, DocumentStatus::Failed).await;
        }
        store.batches().update_batch_progress(&batch.id).await.unwrap();
        let b = store.batches().get(&batch.id).unwrap().unwrap();
        assert_eq!(b.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_recount_is_idempotent() {
        let (_dir, store, batch, docs) = store_with_batch(2).await;
        set_doc_status(&store, &docs[0], DocumentStatus::Completed).await;
        set_doc_status(&store, &docs[1], DocumentStatus::Completed).await;

        let batches = store.batches();
        batches.update_batch_progress(&batch.id).await.unwrap();
        let first = batches.get(&batch.id).unwrap().unwrap();
        batches.update_batch_progress(&batch.id).await.unwrap();
        let second = batches.get(&batch.id).unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.completed_at, second.completed_at);
        assert_eq!(second.completed_documents, 2);
    }

    #[tokio::test]
    async fn test_archived_children_still_count_completed() {
        let (_dir, store, batch, docs) = store_with_batch(1).await;
        set_doc_status(&store, &docs[0], DocumentStatus::Archived).await;
        store.batches().update_batch_progress(&batch.id).await.unwrap();
        let b = store.batches().get(&batch.id).unwrap().unwrap();
        assert_eq!(b.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_filters_by_user() {
        let (_dir, store, _batch, _docs) = store_with_batch(1).await;
        assert_eq!(store.batches().list(Some("u1"), 10).unwrap().len(), 1);
        assert_eq!(store.batches().list(Some("other"), 10).unwrap().len(), 0);
        assert_eq!(store.batches().list(None, 10).unwrap().len(), 1);
    }
}
