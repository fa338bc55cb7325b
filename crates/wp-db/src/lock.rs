//! Advisory lock guaranteeing a single migration run per database.
//!
//! DuckDB has no session advisory locks, so the lock is a lease row in
//! `waypoint_lock` keyed by a stable 64-bit identifier. The holder refreshes
//! the lease from a keep-alive task on its own connection; a lease whose
//! heartbeat is older than the stale threshold counts as abandoned and may be
//! taken over.
//!
//! The keep-alive task owns the acquisition: it tries the lock, publishes the
//! outcome through a shared state flag, then heartbeats until told to stop
//! and finally releases the lease. [`LockHandle::acquire`] polls the flag.

use crate::connection::{with_transaction, TargetDb};
use crate::ddl::LOCK_TABLE;
use crate::error::{DbError, DbResult};
use crate::row_helpers::{format_timestamp, now_utc};
use duckdb::Connection;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use wp_core::LockConfig;

/// Upper bound for the keep-alive loop's sleep slice.
const MAX_TICK: Duration = Duration::from_millis(500);

/// Derive the lock identifier from a stable name.
///
/// First eight bytes of the name's SHA-256, little endian.
pub fn lock_ident(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(bytes)
}

/// Timing and identity of a lock.
#[derive(Debug, Clone)]
pub struct LockSettings {
    pub ident: i64,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

impl LockSettings {
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            ident: lock_ident(&config.name),
            heartbeat_interval: config.heartbeat_interval(),
            poll_interval: config.poll_interval(),
            stale_after: config.stale_after(),
        }
    }

    fn tick(&self) -> Duration {
        self.heartbeat_interval.min(MAX_TICK)
    }
}

/// Lease primitives on a raw connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisoryLock {
    ident: i64,
}

impl AdvisoryLock {
    pub fn new(ident: i64) -> Self {
        Self { ident }
    }

    pub fn ident(&self) -> i64 {
        self.ident
    }

    /// Try to take the lease without waiting.
    ///
    /// Reclaims a lease whose heartbeat is older than `stale_after`. Returns
    /// `false` when a live lease belongs to another holder.
    pub fn try_acquire(
        &self,
        conn: &Connection,
        holder: &str,
        stale_after: Duration,
    ) -> DbResult<bool> {
        let now = now_utc();
        let cutoff = now
            - chrono::Duration::from_std(stale_after)
                .map_err(|e| DbError::ExecutionError(format!("stale threshold: {e}")))?;

        let result = with_transaction(conn, |conn| {
            let reclaimed = conn.execute(
                &format!(
                    "DELETE FROM {LOCK_TABLE} WHERE ident = ? AND heartbeat_at < CAST(? AS TIMESTAMP)"
                ),
                duckdb::params![self.ident, format_timestamp(cutoff)],
            )?;
            if reclaimed > 0 {
                log::warn!("Reclaimed stale advisory lock {}", self.ident);
            }
            let inserted = conn.execute(
                &format!(
                    "INSERT INTO {LOCK_TABLE} (ident, holder, acquired_at, heartbeat_at) \
                     VALUES (?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP)) ON CONFLICT DO NOTHING"
                ),
                duckdb::params![
                    self.ident,
                    holder,
                    format_timestamp(now),
                    format_timestamp(now)
                ],
            )?;
            Ok(inserted == 1)
        });

        match result {
            Err(e) if is_write_conflict(&e) => Ok(false),
            other => other,
        }
    }

    /// Refresh the lease and ping the connection.
    ///
    /// Returns `false` if the lease no longer belongs to `holder`.
    pub fn heartbeat(&self, conn: &Connection, holder: &str) -> DbResult<bool> {
        let updated = conn.execute(
            &format!(
                "UPDATE {LOCK_TABLE} SET heartbeat_at = CAST(? AS TIMESTAMP) \
                 WHERE ident = ? AND holder = ?"
            ),
            duckdb::params![format_timestamp(now_utc()), self.ident, holder],
        )?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))?;
        Ok(updated == 1)
    }

    /// Drop the lease if `holder` owns it.
    pub fn release(&self, conn: &Connection, holder: &str) -> DbResult<()> {
        conn.execute(
            &format!("DELETE FROM {LOCK_TABLE} WHERE ident = ? AND holder = ?"),
            duckdb::params![self.ident, holder],
        )?;
        Ok(())
    }

    /// Current holder of the lease, if any.
    pub fn holder(&self, conn: &Connection) -> DbResult<Option<String>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT holder FROM {LOCK_TABLE} WHERE ident = ?"
        ))?;
        let mut rows = stmt.query(duckdb::params![self.ident])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

/// Concurrent acquirers collide inside DuckDB's optimistic concurrency
/// control; the loser sees a conflict or a duplicate key.
fn is_write_conflict(err: &DbError) -> bool {
    let message = match err {
        DbError::DuckDb(e) => e.to_string(),
        DbError::ExecutionError(m) => m.clone(),
        _ => return false,
    };
    let message = message.to_lowercase();
    message.contains("conflict") || message.contains("duplicate key")
}

const STATE_PENDING: u8 = 0;
const STATE_ACQUIRED: u8 = 1;
const STATE_CONTENDED: u8 = 2;
const STATE_FAILED: u8 = 3;

/// State shared between a handle and its keep-alive task.
#[derive(Default)]
struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    lost: AtomicBool,
    error: Mutex<Option<String>>,
}

impl Shared {
    fn fail(&self, message: String) {
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(message);
        }
        self.state.store(STATE_FAILED, Ordering::SeqCst);
    }

    fn error_message(&self) -> String {
        self.error
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "keep-alive task ended unexpectedly".to_string())
    }
}

/// A held advisory lock with its running keep-alive task.
///
/// Dropping the handle signals the task to stop; call [`LockHandle::release`]
/// to wait for the lease to be removed.
pub struct LockHandle {
    lock: AdvisoryLock,
    settings: LockSettings,
    holder: String,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl LockHandle {
    /// Acquire the lock or fail with [`DbError::LockContended`].
    pub async fn acquire(db: &TargetDb, settings: LockSettings) -> DbResult<Self> {
        let holder = uuid::Uuid::new_v4().to_string();
        let mut handle = Self {
            lock: AdvisoryLock::new(settings.ident),
            settings,
            holder,
            shared: Arc::new(Shared::default()),
            task: None,
        };
        handle.start(db).await?;
        Ok(handle)
    }

    async fn start(&mut self, db: &TargetDb) -> DbResult<()> {
        let conn = db.try_clone_connection()?;
        let shared = Arc::new(Shared::default());
        let task = {
            let shared = Arc::clone(&shared);
            let lock = self.lock;
            let holder = self.holder.clone();
            let settings = self.settings.clone();
            tokio::task::spawn_blocking(move || keep_alive(conn, lock, holder, settings, shared))
        };
        self.shared = shared;

        loop {
            match self.shared.state.load(Ordering::SeqCst) {
                STATE_ACQUIRED => break,
                STATE_CONTENDED => {
                    let _ = task.await;
                    return Err(DbError::LockContended {
                        ident: self.lock.ident(),
                    });
                }
                STATE_FAILED => {
                    let _ = task.await;
                    return Err(DbError::ConnectionError(format!(
                        "advisory lock {}: {}",
                        self.lock.ident(),
                        self.shared.error_message()
                    )));
                }
                _ if task.is_finished() => {
                    return Err(DbError::ConnectionError(self.shared.error_message()));
                }
                _ => tokio::time::sleep(self.settings.poll_interval).await,
            }
        }

        log::info!("Acquired advisory lock {}", self.lock.ident());
        self.task = Some(task);
        Ok(())
    }

    /// Lock identifier.
    pub fn ident(&self) -> i64 {
        self.lock.ident()
    }

    /// Lease holder id written to the lock table.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// True while the keep-alive task runs and still owns the lease.
    pub fn is_held(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
            && !self.shared.lost.load(Ordering::SeqCst)
    }

    /// Fail with [`DbError::LockLost`] if the lease was taken over.
    pub fn check(&self) -> DbResult<()> {
        if self.task.is_some() && self.shared.lost.load(Ordering::SeqCst) {
            return Err(DbError::LockLost {
                ident: self.lock.ident(),
                reason: "lease taken over by another holder".to_string(),
            });
        }
        Ok(())
    }

    /// Stop the keep-alive task and remove the lease.
    ///
    /// Used before the database content is replaced wholesale. Idempotent.
    pub async fn stop(&mut self) -> DbResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.shared.stop.store(true, Ordering::SeqCst);
        task.await.map_err(|e| DbError::LockLost {
            ident: self.lock.ident(),
            reason: format!("keep-alive task failed: {e}"),
        })?;
        log::debug!("Keep-alive for lock {} stopped", self.lock.ident());
        Ok(())
    }

    /// Re-acquire the lock after [`LockHandle::stop`], with the same holder id.
    pub async fn restart(&mut self, db: &TargetDb) -> DbResult<()> {
        self.stop().await?;
        self.start(db).await
    }

    /// Release the lock. Safe to call more than once.
    pub async fn release(&mut self) -> DbResult<()> {
        let was_held = self.task.is_some();
        self.stop().await?;
        if was_held {
            log::info!("Released advisory lock {}", self.lock.ident());
        }
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

/// Body of the keep-alive task.
fn keep_alive(
    conn: Connection,
    lock: AdvisoryLock,
    holder: String,
    settings: LockSettings,
    shared: Arc<Shared>,
) {
    match lock.try_acquire(&conn, &holder, settings.stale_after) {
        Ok(true) => shared.state.store(STATE_ACQUIRED, Ordering::SeqCst),
        Ok(false) => {
            shared.state.store(STATE_CONTENDED, Ordering::SeqCst);
            return;
        }
        Err(e) => {
            shared.fail(e.to_string());
            return;
        }
    }

    let tick = settings.tick();
    let mut since_heartbeat = Duration::ZERO;
    while !shared.stop.load(Ordering::SeqCst) {
        std::thread::sleep(tick);
        since_heartbeat += tick;
        if since_heartbeat < settings.heartbeat_interval {
            continue;
        }
        since_heartbeat = Duration::ZERO;
        match lock.heartbeat(&conn, &holder) {
            Ok(true) => log::trace!("Heartbeat for lock {}", lock.ident()),
            Ok(false) => {
                if !shared.lost.swap(true, Ordering::SeqCst) {
                    log::error!("Advisory lock {} was taken over", lock.ident());
                }
            }
            Err(e) => log::warn!("Heartbeat for lock {} failed: {e}", lock.ident()),
        }
    }

    if let Err(e) = lock.release(&conn, &holder) {
        log::warn!("Failed to release advisory lock {}: {e}", lock.ident());
    }
}

#[cfg(test)]
#[path = "lock_test.rs"]
mod tests;
