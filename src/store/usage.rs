//! Usage row persistence.

use rusqlite::params;

use super::{fmt_ts, Result, Store};
use crate::models::UsageRecord;

/// SQLite-backed repository for usage records.
pub struct UsageRepository {
    store: Store,
}

impl UsageRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert one usage row for a successful conversion.
    pub async fn insert(&self, record: &UsageRecord) -> Result<()> {
        super::with_retry("insert_usage", || {
            let conn = self.store.connect()?;
            conn.execute(
                r#"
                INSERT INTO usage_records (
                    document_id, operation, input_tokens, output_tokens,
                    base_cost_cents, margin_percent, total_cost_cents, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    record.document_id,
                    record.operation,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                    record.base_cost_cents as i64,
                    record.margin_percent as i64,
                    record.total_cost_cents as i64,
                    fmt_ts(record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// All usage rows for a document, oldest first.
    pub fn for_document(&self, document_id: &str) -> Result<Vec<UsageRecord>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT document_id, operation, input_tokens, output_tokens,
                   base_cost_cents, margin_percent, total_cost_cents, created_at
            FROM usage_records WHERE document_id = ? ORDER BY id ASC
            "#,
        )?;
        let records = stmt
            .query_map(params![document_id], |row| {
                Ok(UsageRecord {
                    document_id: row.get(0)?,
                    operation: row.get(1)?,
                    input_tokens: row.get::<_, i64>(2)? as u64,
                    output_tokens: row.get::<_, i64>(3)? as u64,
                    base_cost_cents: row.get::<_, i64>(4)? as u64,
                    margin_percent: row.get::<_, i64>(5)? as u64,
                    total_cost_cents: row.get::<_, i64>(6)? as u64,
                    created_at: super::parse_datetime(&row.get::<_, String>(7)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversionCost;
    use crate::store::StoreOptions;
    use chrono::Utc;

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&StoreOptions {
            path: dir.path().join("service.db"),
            ..Default::default()
        })
        .unwrap();

        let cost = ConversionCost::from_tokens(4_200, 30);
        let record = UsageRecord {
            document_id: "doc-1".into(),
            operation: "convert".into(),
            input_tokens: 4_000,
            output_tokens: 200,
            base_cost_cents: cost.base_cost_cents,
            margin_percent: cost.margin_percent,
            total_cost_cents: cost.total_cost_cents,
            created_at: Utc::now(),
        };
        store.usage().insert(&record).await.unwrap();

        let rows = store.usage().for_document("doc-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].operation, "convert");
        assert_eq!(rows[0].total_cost_cents, cost.total_cost_cents);
    }
}
