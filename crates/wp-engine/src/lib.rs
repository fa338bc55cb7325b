//! wp-engine - Migration sequencing for Waypoint
//!
//! This crate decides which migration steps run, in which order, and how:
//! locally through the host application's module installer and script hook,
//! or remotely through an upgrade service.

pub mod error;
pub mod operations;
pub mod remote;
pub mod sequencer;

pub use error::{EngineError, EngineResult};
pub use operations::{ModuleInstaller, ModuleRegistry, ModuleState, ScriptRunner, SqlScriptRunner};
pub use remote::{
    HttpUpgradeService, RemoteDelegate, RemoteOutcome, RequestStatus, RetryPolicy,
    UpgradeService, UpgradeServiceDelegate,
};
pub use sequencer::{Halt, RunReport, Sequencer};
