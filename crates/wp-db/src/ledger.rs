//! Version ledger: the durable record of started and finished steps.
//!
//! One row per step version in `waypoint_migration`. A row is inserted when a
//! step starts (without `date_done`) and completed when the step finishes.
//! Entries are never deleted by Waypoint.

use crate::connection::TargetDb;
use crate::ddl::LEDGER_TABLE;
use crate::error::{DbError, DbResult};
use crate::migration::ensure_bookkeeping_schema;
use crate::row_helpers::{format_timestamp, parse_timestamp};
use chrono::NaiveDateTime;
use std::fmt;
use wp_core::{Operations, ServiceName, Version};

/// Lifecycle state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// `date_done` is set
    Finished,
    /// Started locally, not finished (crash or error mid-step)
    Started,
    /// Submitted to a remote service, waiting for its result
    PendingRemote,
    /// The remote service reported a failure
    RemoteFailed,
}

impl StepState {
    /// True for states that block a new run until resolved by an operator.
    pub fn blocks_run(&self) -> bool {
        matches!(self, StepState::Started | StepState::RemoteFailed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepState::Finished => "finished",
            StepState::Started => "started",
            StepState::PendingRemote => "pending remote",
            StepState::RemoteFailed => "remote failed",
        };
        f.write_str(label)
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Step version (primary key)
    pub number: Version,
    /// Application release recorded at start
    pub app_version: String,
    /// Start timestamp (naive UTC)
    pub date_start: NaiveDateTime,
    /// Finish timestamp, absent while in flight
    pub date_done: Option<NaiveDateTime>,
    /// Operations snapshot recorded at finish
    pub operations: Option<Operations>,
    /// Remote service the step was submitted to
    pub service: Option<ServiceName>,
    /// Failure reported by the remote service
    pub failure: Option<String>,
}

impl LedgerEntry {
    /// Derive the entry's lifecycle state.
    pub fn state(&self) -> StepState {
        if self.date_done.is_some() {
            StepState::Finished
        } else if self.failure.is_some() {
            StepState::RemoteFailed
        } else if self.service.is_some() {
            StepState::PendingRemote
        } else {
            StepState::Started
        }
    }

    /// True when the step completed.
    pub fn is_finished(&self) -> bool {
        self.date_done.is_some()
    }
}

/// Read/write access to the ledger with a per-run read cache.
///
/// The cache is filled on first read and refreshed after each write made
/// through this ledger. It must be invalidated when the database content is
/// replaced underneath it (remote restore).
pub struct VersionLedger<'a> {
    db: &'a TargetDb,
    cache: Option<Vec<LedgerEntry>>,
}

impl<'a> VersionLedger<'a> {
    /// Open the ledger, creating its storage if needed.
    pub fn new(db: &'a TargetDb) -> DbResult<Self> {
        let ledger = Self { db, cache: None };
        ledger.ensure_schema()?;
        Ok(ledger)
    }

    /// Open the ledger for reading without touching the schema.
    ///
    /// For read-only callers that do not hold the lock; the schema is
    /// expected to exist already ([`TargetDb::open`] creates it).
    pub fn read_only(db: &'a TargetDb) -> Self {
        Self { db, cache: None }
    }

    /// Idempotently create the ledger storage.
    pub fn ensure_schema(&self) -> DbResult<()> {
        self.db.with_conn(ensure_bookkeeping_schema)
    }

    /// All entries, ordered by version.
    pub fn list_entries(&mut self) -> DbResult<Vec<LedgerEntry>> {
        if let Some(entries) = &self.cache {
            return Ok(entries.clone());
        }
        let entries = self.db.with_conn(read_entries)?;
        self.cache = Some(entries.clone());
        Ok(entries)
    }

    /// The entry for `version`, if any.
    pub fn entry(&mut self, version: &Version) -> DbResult<Option<LedgerEntry>> {
        Ok(self
            .list_entries()?
            .into_iter()
            .find(|e| &e.number == version))
    }

    /// Versions of all finished entries, ascending.
    pub fn finished_versions(&mut self) -> DbResult<Vec<Version>> {
        Ok(self
            .list_entries()?
            .into_iter()
            .filter(LedgerEntry::is_finished)
            .map(|e| e.number)
            .collect())
    }

    /// Entries left started or failed, which block a new run.
    pub fn unfinished_entries(&mut self) -> DbResult<Vec<LedgerEntry>> {
        Ok(self
            .list_entries()?
            .into_iter()
            .filter(|e| e.state().blocks_run())
            .collect())
    }

    /// Service steps submitted and not yet collected.
    pub fn pending_remote_entries(&mut self) -> DbResult<Vec<LedgerEntry>> {
        Ok(self
            .list_entries()?
            .into_iter()
            .filter(|e| e.state() == StepState::PendingRemote)
            .collect())
    }

    /// Record that a step began.
    pub fn start(
        &mut self,
        version: &Version,
        app_version: &str,
        timestamp: NaiveDateTime,
        service: Option<ServiceName>,
    ) -> DbResult<()> {
        let inserted = self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {LEDGER_TABLE} (number, app_version, date_start, service) \
                     VALUES (?, ?, CAST(? AS TIMESTAMP), ?) ON CONFLICT DO NOTHING"
                ),
                duckdb::params![
                    version.to_string(),
                    app_version,
                    format_timestamp(timestamp),
                    service.map(|s| s.as_str()),
                ],
            )
            .map_err(DbError::from)
        })?;
        self.invalidate();
        if inserted == 0 {
            return Err(DbError::DuplicateVersion {
                version: version.to_string(),
            });
        }
        log::debug!("Ledger: started {version}");
        Ok(())
    }

    /// Record that a started step completed, with its operations snapshot.
    pub fn finish(
        &mut self,
        version: &Version,
        timestamp: NaiveDateTime,
        operations: &Operations,
    ) -> DbResult<()> {
        let snapshot = serde_json::to_string(operations)
            .map_err(|e| DbError::ExecutionError(format!("operations snapshot: {e}")))?;
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE {LEDGER_TABLE} SET date_done = CAST(? AS TIMESTAMP), operations = ?, \
                     failure = NULL WHERE number = ? AND date_done IS NULL"
                ),
                duckdb::params![format_timestamp(timestamp), snapshot, version.to_string()],
            )
            .map_err(DbError::from)
        })?;
        self.invalidate();
        if updated == 0 {
            return Err(DbError::UnknownVersion {
                version: version.to_string(),
            });
        }
        log::debug!("Ledger: finished {version}");
        Ok(())
    }

    /// Record a remote failure on an in-flight service step.
    pub fn mark_failed(&mut self, version: &Version, reason: &str) -> DbResult<()> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE {LEDGER_TABLE} SET failure = ? \
                     WHERE number = ? AND date_done IS NULL AND service IS NOT NULL"
                ),
                duckdb::params![reason, version.to_string()],
            )
            .map_err(DbError::from)
        })?;
        self.invalidate();
        if updated == 0 {
            return Err(DbError::UnknownVersion {
                version: version.to_string(),
            });
        }
        Ok(())
    }

    /// Hand a restored service step over to local execution.
    ///
    /// Drops the service marker so the entry reads as [`StepState::Started`]:
    /// if the local part of the step fails, the next run is blocked instead
    /// of submitting the half-applied database again.
    pub fn mark_restored(&mut self, version: &Version) -> DbResult<()> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE {LEDGER_TABLE} SET service = NULL \
                     WHERE number = ? AND date_done IS NULL AND failure IS NULL"
                ),
                duckdb::params![version.to_string()],
            )
            .map_err(DbError::from)
        })?;
        self.invalidate();
        if updated == 0 {
            return Err(DbError::UnknownVersion {
                version: version.to_string(),
            });
        }
        log::debug!("Ledger: {version} restored, continuing locally");
        Ok(())
    }

    /// Operator resolution of a blocking entry: mark it finished as-is,
    /// recording `operations` as its snapshot.
    ///
    /// Returns the state the entry was in before resolution.
    pub fn resolve(
        &mut self,
        version: &Version,
        timestamp: NaiveDateTime,
        operations: &Operations,
    ) -> DbResult<StepState> {
        let entry = self
            .entry(version)?
            .filter(|e| !e.is_finished())
            .ok_or_else(|| DbError::UnknownVersion {
                version: version.to_string(),
            })?;
        let state = entry.state();
        self.finish(version, timestamp, operations)?;
        Ok(state)
    }

    /// Drop cached reads so the next read hits the database.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }
}

fn read_entries(conn: &duckdb::Connection) -> DbResult<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT number, app_version, CAST(date_start AS VARCHAR), CAST(date_done AS VARCHAR), \
         operations, service, failure FROM {LEDGER_TABLE}"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawEntry {
                number: row.get(0)?,
                app_version: row.get(1)?,
                date_start: row.get(2)?,
                date_done: row.get(3)?,
                operations: row.get(4)?,
                service: row.get(5)?,
                failure: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut entries = rows
        .into_iter()
        .map(RawEntry::decode)
        .collect::<DbResult<Vec<_>>>()?;
    entries.sort_by(|a, b| a.number.cmp(&b.number));
    Ok(entries)
}

/// Ledger row as stored, before decoding.
struct RawEntry {
    number: String,
    app_version: String,
    date_start: String,
    date_done: Option<String>,
    operations: Option<String>,
    service: Option<String>,
    failure: Option<String>,
}

impl RawEntry {
    fn decode(self) -> DbResult<LedgerEntry> {
        let corrupt = |reason: String| DbError::CorruptEntry {
            number: self.number.clone(),
            reason,
        };
        let number = Version::parse(&self.number).map_err(|e| corrupt(e.to_string()))?;
        let date_start =
            parse_timestamp(&self.date_start).map_err(|e| corrupt(format!("date_start: {e}")))?;
        let date_done = self
            .date_done
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| corrupt(format!("date_done: {e}")))?;
        let operations = match self.operations.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(json) => Some(
                serde_json::from_str(json).map_err(|e| corrupt(format!("operations: {e}")))?,
            ),
        };
        let service = match self.service.as_deref() {
            None | Some("") => None,
            Some(name) => Some(
                ServiceName::from_name(name)
                    .ok_or_else(|| corrupt(format!("unknown service '{name}'")))?,
            ),
        };
        Ok(LedgerEntry {
            number,
            app_version: self.app_version,
            date_start,
            date_done,
            operations,
            service,
            failure: self.failure.filter(|f| !f.is_empty()),
        })
    }
}

#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;
