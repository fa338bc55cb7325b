//! Error types for wp-engine

use thiserror::Error;
use wp_core::CoreError;
use wp_db::DbError;

/// Sequencer and remote delegation errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// `--since` does not match the ledger history (S001)
    #[error(
        "[S001] The --since bound must name the last finished migration, starting elsewhere \
         would leave a gap. Last finished version: {finished}. --since {since}."
    )]
    Gap { finished: String, since: String },

    /// Previous run left steps incomplete (S002)
    #[error(
        "[S002] Migration of version {versions} was attempted and did not finish. \
         Restore the backup, or fix the database manually and mark the step done \
         with `waypoint resolve <VERSION>`."
    )]
    Unfinished { versions: String },

    /// A step needs a remote service but none is configured (S003)
    #[error("[S003] Migration {version} is delegated to service '{service}' but remote delegation is disabled")]
    RemoteNotConfigured { version: String, service: String },

    /// The remote service reported a failed upgrade (S004)
    #[error("[S004] Remote upgrade of {version} failed: {reason}")]
    RemoteFailed { version: String, reason: String },

    /// A submitted step must be collected before anything else runs (S005)
    #[error(
        "[S005] Migration {versions} is being upgraded by a remote service and must be \
         collected before any other migration runs. Keep it as the next pending step \
         in the step document, or mark it done with `waypoint resolve <VERSION>`."
    )]
    RemoteInFlight { versions: String },

    /// Processing requested before the snapshot was uploaded (R001)
    #[error("[R001] Cannot start remote processing: the database snapshot was not uploaded")]
    NotUploaded,

    /// The upgrade service rejected a call (R002)
    #[error("[R002] Upgrade service error: {message}")]
    Service { message: String },

    /// HTTP transport error (R003)
    #[error("[R003] Upgrade service unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// Chunked transfer gave up after retries (R004)
    #[error("[R004] {what} failed after {attempts} attempts: {message}")]
    Transfer {
        what: String,
        attempts: u32,
        message: String,
    },

    /// Remote credentials could not be resolved (R005)
    #[error("[R005] Remote credentials incomplete: {message}")]
    Credentials { message: String },

    /// Module not present in the registry (X001)
    #[error("[X001] Module '{name}' is not known to the module registry")]
    ModuleNotFound { name: String },

    /// A module mark is not allowed in the module's current state (X002)
    #[error("[X002] Cannot {action} module '{name}' in state '{state}'")]
    ModuleState {
        name: String,
        action: String,
        state: String,
    },

    /// A step script failed (X003)
    #[error("[X003] Script {path} failed: {message}")]
    Script { path: String, message: String },

    /// IO error (X004)
    #[error("[X004] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result type alias for EngineError
pub type EngineResult<T> = Result<T, EngineError>;
