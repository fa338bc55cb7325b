//! Schema migration runner for Waypoint's own bookkeeping tables.
//!
//! Tracks applied DDL versions in `waypoint_schema_version` and runs any
//! unapplied ones. Safe to call on every open.

use crate::ddl::{MIGRATIONS, SCHEMA_VERSION_TABLE};
use crate::error::{DbError, DbResult};
use duckdb::Connection;

/// Ensure the `waypoint_schema_version` table exists.
fn ensure_version_table(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {SCHEMA_VERSION_TABLE} (
             version    INTEGER NOT NULL,
             applied_at TIMESTAMP NOT NULL DEFAULT now()
         );"
    ))
    .map_err(|e| DbError::SchemaError(format!("failed to create schema version table: {e}")))?;
    Ok(())
}

/// Return the highest applied DDL version, or 0 if none.
fn current_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn
        .query_row(
            &format!("SELECT COALESCE(MAX(version), 0) FROM {SCHEMA_VERSION_TABLE}"),
            [],
            |row| row.get(0),
        )
        .map_err(|e| DbError::SchemaError(format!("failed to read schema version: {e}")))?;
    Ok(version)
}

/// Create or upgrade the ledger, lock, and parameter tables.
///
/// Idempotent: already applied DDL versions are skipped.
pub fn ensure_bookkeeping_schema(conn: &Connection) -> DbResult<()> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        log::debug!("Applying bookkeeping DDL v{:03}", migration.version);

        conn.execute_batch(migration.sql).map_err(|e| {
            DbError::SchemaError(format!("DDL v{:03} failed: {e}", migration.version))
        })?;

        conn.execute(
            &format!("INSERT INTO {SCHEMA_VERSION_TABLE} (version) VALUES (?)"),
            duckdb::params![migration.version],
        )
        .map_err(|e| {
            DbError::SchemaError(format!(
                "failed to record DDL v{:03}: {e}",
                migration.version
            ))
        })?;
    }
    Ok(())
}
