//! Configuration types and parsing for waypoint.yml

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file names looked up in a project directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["waypoint.yml", "waypoint.yaml"];

/// Main configuration from waypoint.yml
///
/// Every section has defaults, so a missing file is equivalent to an empty
/// one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Target database connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Step document to apply
    #[serde(default = "default_migrations_file")]
    pub migrations_file: String,

    /// Base directory for relative script paths
    #[serde(default)]
    pub scripts_dir: Option<String>,

    /// Advisory lock settings
    #[serde(default)]
    pub lock: LockConfig,

    /// Remote upgrade service settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            migrations_file: default_migrations_file(),
            scripts_dir: None,
            lock: LockConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database path (DuckDB file or :memory:)
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Advisory lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Stable name the lock identifier is derived from
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Seconds between keep-alive heartbeats
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Milliseconds between checks while waiting for the lock task
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds without heartbeat after which a lease counts as abandoned
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: default_lock_name(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl LockConfig {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Acquisition poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lease staleness threshold as a [`Duration`].
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// What the remote service should do with the uploaded database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeMode {
    /// Rehearsal upgrade, the result is meant for validation
    #[default]
    Test,
    /// Final upgrade of the production database
    Production,
}

impl UpgradeMode {
    /// Identifier sent to the service.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeMode::Test => "test",
            UpgradeMode::Production => "production",
        }
    }
}

impl std::fmt::Display for UpgradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote upgrade service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL of the upgrade service API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upgrade mode requested on submission
    #[serde(default)]
    pub mode: UpgradeMode,

    /// Client name reported to the service
    #[serde(default = "default_application")]
    pub application: String,

    /// Contract code override (otherwise read from the database)
    #[serde(default)]
    pub contract: Option<String>,

    /// Operator email override (otherwise read from the database)
    #[serde(default)]
    pub email: Option<String>,

    /// Chunked transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            mode: UpgradeMode::default(),
            application: default_application(),
            contract: None,
            email: None,
            transfer: TransferConfig::default(),
        }
    }
}

/// Retry and chunking policy for snapshot transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    /// Attempts before a transfer is given up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on each further retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Bytes sent per upload request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

const DEFAULT_DB_PATH: &str = ":memory:";

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_migrations_file() -> String {
    ".migrations.yaml".to_string()
}

fn default_lock_name() -> String {
    "waypoint".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stale_after_secs() -> u64 {
    120
}

fn default_base_url() -> String {
    "https://upgrade.odoo.com".to_string()
}

fn default_application() -> String {
    "Waypoint".to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_chunk_size() -> usize {
    32_768
}

impl Config {
    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| CoreError::ConfigParseError {
                message: format!("{}: {e}", path.display()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a project directory
    /// Looks for waypoint.yml or waypoint.yaml, falling back to defaults
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        match CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
        {
            Some(path) => Self::load(&path),
            None => {
                log::debug!("No waypoint.yml in {}, using defaults", dir.display());
                Ok(Self::default())
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.database.path.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "database.path cannot be empty".to_string(),
            });
        }
        if self.lock.name.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "lock.name cannot be empty".to_string(),
            });
        }
        if self.lock.heartbeat_interval_secs == 0 || self.lock.poll_interval_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "lock intervals must be greater than zero".to_string(),
            });
        }
        if self.lock.stale_after_secs <= self.lock.heartbeat_interval_secs {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "lock.stale_after_secs ({}) must exceed lock.heartbeat_interval_secs ({})",
                    self.lock.stale_after_secs, self.lock.heartbeat_interval_secs
                ),
            });
        }
        if self.remote.transfer.max_attempts == 0 || self.remote.transfer.chunk_size == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "remote.transfer.max_attempts and chunk_size must be greater than zero"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the step document path against a project root
    pub fn migrations_file_absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.migrations_file)
    }

    /// Resolve the scripts directory against a project root
    pub fn scripts_dir_absolute(&self, root: &Path) -> PathBuf {
        match &self.scripts_dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
