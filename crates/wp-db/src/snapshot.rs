//! Whole-database snapshot export and restore.
//!
//! A snapshot is a standalone DuckDB file holding a copy of every schema,
//! table, view, and sequence of the target. Lock leases are never carried
//! across: the export strips them and the restore clears them.

use crate::connection::TargetDb;
use crate::ddl::LOCK_TABLE;
use crate::error::{DbError, DbResult};
use crate::row_helpers::{quote_ident, quote_literal};
use duckdb::Connection;
use std::path::Path;

const EXPORT_ALIAS: &str = "wp_snapshot";
const IMPORT_ALIAS: &str = "wp_incoming";

/// Passes over the drop list, for objects blocked by dependents.
const MAX_DROP_PASSES: usize = 8;

/// Write a snapshot of the target database to `dest`.
///
/// `dest` must not exist yet.
pub fn export_snapshot(db: &TargetDb, dest: &Path) -> DbResult<()> {
    if dest.exists() {
        return Err(DbError::SnapshotError(format!(
            "{} already exists",
            dest.display()
        )));
    }
    let current = db.database_name()?;
    log::debug!("Exporting snapshot of '{current}' to {}", dest.display());

    db.with_conn(|conn| {
        conn.execute_batch(&format!(
            "ATTACH {} AS {EXPORT_ALIAS}",
            quote_literal(&dest.display().to_string())
        ))
        .map_err(|e| DbError::SnapshotError(format!("attach {}: {e}", dest.display())))?;

        let copied = copy_database(conn, &current, EXPORT_ALIAS)
            .and_then(|_| clear_leases(conn, EXPORT_ALIAS));
        let detached = detach(conn, EXPORT_ALIAS);
        copied.and(detached)
    })
}

/// Replace the target database content with the snapshot at `source`.
///
/// The caller must have stopped any lock keep-alive task first, and must
/// re-read anything cached from the database afterwards.
pub fn restore_snapshot(db: &TargetDb, source: &Path) -> DbResult<()> {
    if !source.is_file() {
        return Err(DbError::SnapshotError(format!(
            "{} does not exist",
            source.display()
        )));
    }
    let current = db.database_name()?;
    log::debug!("Restoring '{current}' from {}", source.display());

    db.with_conn(|conn| {
        conn.execute_batch(&format!(
            "ATTACH {} AS {IMPORT_ALIAS} (READ_ONLY)",
            quote_literal(&source.display().to_string())
        ))
        .map_err(|e| DbError::SnapshotError(format!("attach {}: {e}", source.display())))?;

        let restored = drop_all_objects(conn, &current)
            .and_then(|_| copy_database(conn, IMPORT_ALIAS, &current))
            .and_then(|_| clear_leases(conn, &current));
        let detached = detach(conn, IMPORT_ALIAS);
        restored.and(detached)
    })
}

fn copy_database(conn: &Connection, from: &str, to: &str) -> DbResult<()> {
    conn.execute_batch(&format!(
        "COPY FROM DATABASE {} TO {}",
        quote_ident(from),
        quote_ident(to)
    ))
    .map_err(|e| DbError::SnapshotError(format!("copy {from} -> {to}: {e}")))
}

fn detach(conn: &Connection, alias: &str) -> DbResult<()> {
    conn.execute_batch(&format!("DETACH {alias}"))
        .map_err(|e| DbError::SnapshotError(format!("detach {alias}: {e}")))
}

fn clear_leases(conn: &Connection, catalog: &str) -> DbResult<()> {
    let present: i64 = conn.query_row(
        "SELECT COUNT(*) FROM duckdb_tables() \
         WHERE database_name = ? AND schema_name = 'main' AND table_name = ?",
        duckdb::params![catalog, LOCK_TABLE],
        |row| row.get(0),
    )?;
    if present > 0 {
        conn.execute_batch(&format!(
            "DELETE FROM {}.main.{LOCK_TABLE}",
            quote_ident(catalog)
        ))?;
    }
    Ok(())
}

/// Names of user objects of one kind in `catalog`, as `(schema, name)`.
fn list_objects(conn: &Connection, sql: &str, catalog: &str) -> DbResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(duckdb::params![catalog], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn drop_all_objects(conn: &Connection, catalog: &str) -> DbResult<()> {
    let db = quote_ident(catalog);

    for (schema, view) in list_objects(
        conn,
        "SELECT schema_name, view_name FROM duckdb_views() \
         WHERE database_name = ? AND NOT internal AND NOT temporary",
        catalog,
    )? {
        conn.execute_batch(&format!(
            "DROP VIEW IF EXISTS {db}.{}.{}",
            quote_ident(&schema),
            quote_ident(&view)
        ))?;
    }

    let mut tables = list_objects(
        conn,
        "SELECT schema_name, table_name FROM duckdb_tables() \
         WHERE database_name = ? AND NOT temporary",
        catalog,
    )?;
    // Tables referenced by a foreign key only drop after their dependents.
    for _ in 0..MAX_DROP_PASSES {
        if tables.is_empty() {
            break;
        }
        let mut blocked = Vec::new();
        for (schema, table) in tables {
            let sql = format!(
                "DROP TABLE IF EXISTS {db}.{}.{}",
                quote_ident(&schema),
                quote_ident(&table)
            );
            if conn.execute_batch(&sql).is_err() {
                blocked.push((schema, table));
            }
        }
        tables = blocked;
    }
    if let Some((schema, table)) = tables.first() {
        return Err(DbError::SnapshotError(format!(
            "could not drop {schema}.{table} before restore"
        )));
    }

    for (schema, sequence) in list_objects(
        conn,
        "SELECT schema_name, sequence_name FROM duckdb_sequences() \
         WHERE database_name = ? AND NOT temporary",
        catalog,
    )? {
        conn.execute_batch(&format!(
            "DROP SEQUENCE IF EXISTS {db}.{}.{}",
            quote_ident(&schema),
            quote_ident(&sequence)
        ))?;
    }

    let mut stmt = conn.prepare(
        "SELECT schema_name FROM duckdb_schemas() \
         WHERE database_name = ? AND NOT internal AND schema_name <> 'main'",
    )?;
    let schemas = stmt
        .query_map(duckdb::params![catalog], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for schema in schemas {
        conn.execute_batch(&format!(
            "DROP SCHEMA IF EXISTS {db}.{} CASCADE",
            quote_ident(&schema)
        ))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
