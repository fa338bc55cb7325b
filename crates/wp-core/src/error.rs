//! Error types for wp-core

use thiserror::Error;

/// Core error type for Waypoint
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Configuration file not found
    #[error("[E001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// E002: Failed to parse configuration file
    #[error("[E002] Failed to parse config: {message}")]
    ConfigParseError { message: String },

    /// E003: Invalid configuration value
    #[error("[E003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E004: Version string is not a semantic version
    #[error("[E004] Invalid version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    /// E005: Malformed step document
    ///
    /// The display form carries the usage example so the operator can
    /// compare their document against a known-good one.
    #[error(
        "[E005] An error occured while parsing the migration file. \
         Here is an example to help you figure out the issue.\n{example}\n`{field}`: {message}"
    )]
    Parse {
        field: String,
        message: String,
        example: &'static str,
    },

    /// E006: The same version appears in more than one step document
    #[error("[E006] Duplicate migration version {version} in step document")]
    DuplicateStep { version: String },

    /// E007: IO error
    #[error("[E007] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// E008: IO error with file path context
    #[error("[E008] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// E009: YAML parse error
    #[error("[E009] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
