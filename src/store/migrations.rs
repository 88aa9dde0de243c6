//! Schema migrations embedded at compile time.
//!
//! A fresh install applies the highest-numbered migration wholesale; it is
//! the canonical schema. Existing databases are detected by the presence of
//! the `documents` table.

use rusqlite::Connection;

use super::{Result, StoreError};

/// Embedded migrations, ordered by number. The last entry is canonical for
/// fresh installs.
const MIGRATIONS: &[(&str, &str)] = &[("0001_initial", include_str!("../../migrations/0001_initial.sql"))];

/// Apply migrations if the schema is missing.
///
/// Statements that would duplicate existing objects are tolerated; any other
/// failure aborts startup.
pub fn migrate(conn: &Connection) -> Result<()> {
    let has_documents: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='documents'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)?;

    if has_documents {
        tracing::debug!("schema present, skipping migration");
        return Ok(());
    }

    let (name, sql) = MIGRATIONS
        .last()
        .expect("at least one embedded migration");
    tracing::info!(migration = name, "applying schema migration");

    for stmt in split_statements(sql) {
        if let Err(e) = conn.execute_batch(stmt) {
            if e.to_string().contains("already exists") {
                continue;
            }
            return Err(StoreError::Migration(format!(
                "migration {} failed on statement:\n{}\nerror: {}",
                name, stmt, e
            )));
        }
    }

    Ok(())
}

/// Split a migration file into executable statements, skipping comment-only
/// fragments.
fn split_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| {
            !stmt.is_empty()
                && !stmt.lines().all(|line| {
                    let line = line.trim();
                    line.is_empty() || line.starts_with("--")
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements_skips_comments() {
        let sql = "-- header\nCREATE TABLE a (x INTEGER);\n\n-- note\nCREATE TABLE b (y INTEGER);\n";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE TABLE a"));
    }

    #[test]
    fn test_migrate_twice_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_migrate_tolerates_partial_schema() {
        let conn = Connection::open_in_memory().unwrap();
        // A leftover table without the sentinel `documents` table must not
        // abort the migration.
        conn.execute_batch("CREATE TABLE batches (id TEXT PRIMARY KEY, user_id TEXT NOT NULL DEFAULT '', api_key_id TEXT NOT NULL DEFAULT '', total_documents INTEGER NOT NULL DEFAULT 0, completed_documents INTEGER NOT NULL DEFAULT 0, failed_documents INTEGER NOT NULL DEFAULT 0, status TEXT NOT NULL DEFAULT 'pending', priority INTEGER NOT NULL DEFAULT 0, metadata TEXT NOT NULL DEFAULT '{}', created_at TEXT NOT NULL, completed_at TEXT)")
            .unwrap();
        migrate(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='documents'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }
}
