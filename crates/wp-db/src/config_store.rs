//! Key/value configuration parameters stored in the target database.
//!
//! Remote credentials and in-flight request state live here so they travel
//! with the database through snapshot and restore.

use crate::connection::TargetDb;
use crate::ddl::CONFIG_TABLE;
use crate::error::DbResult;

/// Parameter store backed by `waypoint_config_parameter`.
pub struct ConfigStore<'a> {
    db: &'a TargetDb,
}

impl<'a> ConfigStore<'a> {
    pub fn new(db: &'a TargetDb) -> Self {
        Self { db }
    }

    /// Value for `key`. Empty values read as absent.
    pub fn get(&self, key: &str) -> DbResult<Option<String>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT value FROM {CONFIG_TABLE} WHERE key = ?"))?;
            let mut rows = stmt.query(duckdb::params![key])?;
            let value: Option<String> = match rows.next()? {
                Some(row) => row.get(0)?,
                None => None,
            };
            Ok(value.filter(|v| !v.is_empty()))
        })
    }

    /// Insert or overwrite `key`.
    pub fn set(&self, key: &str, value: &str) -> DbResult<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {CONFIG_TABLE} (key, value) VALUES (?, ?) \
                     ON CONFLICT (key) DO UPDATE SET value = excluded.value"
                ),
                duckdb::params![key, value],
            )?;
            Ok(())
        })
    }

    /// Remove `key` if present.
    pub fn unset(&self, key: &str) -> DbResult<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {CONFIG_TABLE} WHERE key = ?"),
                duckdb::params![key],
            )?;
            Ok(())
        })
    }
}
