//! Target database connection wrapper.
//!
//! [`TargetDb`] owns the DuckDB [`Connection`] of the database being migrated.
//! The connection sits behind a `Mutex` so the database can be shared with
//! async tasks; lock guards never outlive a single call.

use crate::error::{DbError, DbResult};
use crate::migration::ensure_bookkeeping_schema;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Path value selecting an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Connection to the database being migrated.
pub struct TargetDb {
    conn: Mutex<Connection>,
    path: String,
}

impl TargetDb {
    /// Open (or create) the database at `path` and ensure the bookkeeping
    /// tables exist.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DbError::ConnectionError(format!("{e}: {}", path.display())))?;
        Self::from_connection(conn, path.display().to_string())
    }

    /// Create an in-memory database with the bookkeeping tables applied.
    pub fn open_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Self::from_connection(conn, IN_MEMORY.to_string())
    }

    /// Open from a configured path string (handles `:memory:`).
    pub fn new(path: &str) -> DbResult<Self> {
        if path == IN_MEMORY {
            Self::open_memory()
        } else {
            Self::open(Path::new(path))
        }
    }

    fn from_connection(conn: Connection, path: String) -> DbResult<Self> {
        ensure_bookkeeping_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Path the database was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock_conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    /// Run `body` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, body: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let conn = self.lock_conn()?;
        body(&conn)
    }

    /// Execute `body` within a `BEGIN` / `COMMIT` transaction, rolling back on
    /// error.
    pub fn transaction<F, T>(&self, body: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let conn = self.lock_conn()?;
        with_transaction(&conn, body)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| DbError::ExecutionError(e.to_string()))
        })
    }

    /// Open a second connection to the same database instance.
    ///
    /// Used by the lock keep-alive task, which must not contend with the
    /// migration for the primary connection.
    pub fn try_clone_connection(&self) -> DbResult<Connection> {
        self.with_conn(|conn| {
            conn.try_clone()
                .map_err(|e| DbError::ConnectionError(format!("clone failed: {e}")))
        })
    }

    /// Catalog name of the attached database (e.g. `memory` or the file stem).
    pub fn database_name(&self) -> DbResult<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT current_database()", [], |row| row.get(0))
                .map_err(DbError::from)
        })
    }
}

/// Execute `body` inside a transaction on a raw connection.
pub(crate) fn with_transaction<F, T>(conn: &Connection, body: F) -> DbResult<T>
where
    F: FnOnce(&Connection) -> DbResult<T>,
{
    conn.execute_batch("BEGIN TRANSACTION")
        .map_err(|e| DbError::ExecutionError(format!("BEGIN failed: {e}")))?;

    let result = body(conn);

    match &result {
        Ok(_) => {
            if let Err(commit_err) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(DbError::ExecutionError(format!(
                    "COMMIT failed: {commit_err}"
                )));
            }
        }
        Err(_) => {
            let _ = conn.execute_batch("ROLLBACK");
        }
    }
    result
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
