//! Embedded DDL for Waypoint's bookkeeping tables.
//!
//! Each migration is a numbered `.sql` file embedded via `include_str!`.
//! The [`MIGRATIONS`] array is ordered by version number and consumed by
//! [`crate::migration::ensure_bookkeeping_schema`].

/// Ledger table name.
pub const LEDGER_TABLE: &str = "waypoint_migration";

/// Advisory lock lease table name.
pub const LOCK_TABLE: &str = "waypoint_lock";

/// Configuration parameter table name.
pub const CONFIG_TABLE: &str = "waypoint_config_parameter";

/// Schema version table name.
pub const SCHEMA_VERSION_TABLE: &str = "waypoint_schema_version";

/// A single DDL migration.
pub struct Migration {
    /// Sequential version number (1-based).
    pub version: i32,
    /// Raw SQL to execute.
    pub sql: &'static str,
}

/// All known migrations, in order.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("v001_bookkeeping.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("v002_remote_failure.sql"),
    },
];
