//! Error types for wp-db

use thiserror::Error;

/// Target database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Bookkeeping schema could not be created (D003)
    #[error("[D003] Bookkeeping schema migration failed: {0}")]
    SchemaError(String),

    /// Mutex poisoned (D004)
    #[error("[D004] Database mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// Ledger already holds the version (D005)
    #[error("[D005] Migration {version} is already recorded in the ledger")]
    DuplicateVersion { version: String },

    /// No in-flight ledger entry for the version (D006)
    #[error("[D006] No in-flight ledger entry for migration {version}")]
    UnknownVersion { version: String },

    /// Ledger row could not be decoded (D007)
    #[error("[D007] Corrupt ledger entry {number}: {reason}")]
    CorruptEntry { number: String, reason: String },

    /// Another process holds the advisory lock (D008)
    #[error("[D008] A concurrent process is already running the migration (lock {ident})")]
    LockContended { ident: i64 },

    /// The advisory lock was taken over or could not be kept (D009)
    #[error("[D009] Advisory lock {ident} lost: {reason}")]
    LockLost { ident: i64, reason: String },

    /// Snapshot export or restore failed (D010)
    #[error("[D010] Database snapshot failed: {0}")]
    SnapshotError(String),

    /// DuckDB driver error with preserved source chain (D011)
    #[error("[D011] DuckDB error")]
    DuckDb(#[source] duckdb::Error),
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::DuckDb(err)
    }
}
