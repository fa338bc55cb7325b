//! Remote upgrade delegation.
//!
//! A step that names a `service` is not executed locally: the database is
//! exported, shipped to the upgrade service, and the upgraded database is
//! restored on a later run once the service reports completion.

pub mod credentials;
pub mod delegate;
pub mod service;
pub mod transfer;

use crate::error::EngineResult;
use async_trait::async_trait;
use wp_core::{ServiceName, StepDescriptor};
use wp_db::{LockHandle, TargetDb};

pub use credentials::{RequestStage, RequestState, ServiceCredentials};
pub use delegate::UpgradeServiceDelegate;
pub use service::{HttpUpgradeService, RequestStatus, UpgradeService};
pub use transfer::{with_backoff, RetryPolicy};

/// Result of asking the remote service about a submitted step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The upgraded database has been restored locally
    Finished,
    /// Still processing; try again on a later run
    Pending,
    /// The service gave up on the request
    Failed(String),
}

/// Bridge between the sequencer and an external upgrade service.
#[async_trait]
pub trait RemoteDelegate: Send + Sync {
    /// Ship the database for `step` and start processing. Returns without
    /// waiting for the result.
    async fn submit(
        &self,
        service: ServiceName,
        step: &StepDescriptor,
        db: &TargetDb,
        lock: &mut LockHandle,
    ) -> EngineResult<()>;

    /// Check on the submitted `step`, restoring the result when done.
    async fn retrieve(
        &self,
        service: ServiceName,
        step: &StepDescriptor,
        db: &TargetDb,
        lock: &mut LockHandle,
    ) -> EngineResult<RemoteOutcome>;
}
