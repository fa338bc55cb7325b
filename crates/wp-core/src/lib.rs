//! wp-core - Core library for Waypoint
//!
//! This crate provides the shared types used across all Waypoint components:
//! semantic step versions, migration step documents and their validation,
//! and configuration parsing.

pub mod config;
pub mod error;
pub mod module_name;
pub mod step;
pub mod version;

pub use config::{Config, LockConfig, RemoteConfig, TransferConfig, UpgradeMode};
pub use error::{CoreError, CoreResult};
pub use module_name::ModuleName;
pub use step::{Operations, ServiceName, StepDescriptor};
pub use version::Version;
