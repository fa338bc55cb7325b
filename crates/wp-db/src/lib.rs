//! wp-db - Database layer for Waypoint
//!
//! This crate owns everything Waypoint stores in the target DuckDB database:
//! the version ledger, the advisory lock lease, configuration parameters, and
//! whole-database snapshots used by remote upgrades.

pub mod config_store;
pub mod connection;
pub mod ddl;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod migration;
pub(crate) mod row_helpers;
pub mod snapshot;

pub use config_store::ConfigStore;
pub use connection::TargetDb;
pub use error::{DbError, DbResult};
pub use ledger::{LedgerEntry, StepState, VersionLedger};
pub use lock::{lock_ident, AdvisoryLock, LockHandle, LockSettings};
pub use snapshot::{export_snapshot, restore_snapshot};
