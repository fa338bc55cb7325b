//! [`RemoteDelegate`] driving an [`UpgradeService`].
//!
//! Every protocol stage is persisted before moving on, so `submit` and
//! `retrieve` can both pick up a request that a crashed run left behind.

use crate::error::{EngineError, EngineResult};
use crate::remote::credentials::{RequestStage, RequestState, ServiceCredentials};
use crate::remote::service::{CreateRequest, RequestStatus, TransferAccess, UpgradeService};
use crate::remote::transfer::{RetryPolicy, Transfer};
use crate::remote::{RemoteDelegate, RemoteOutcome};
use async_trait::async_trait;
use wp_core::{RemoteConfig, ServiceName, StepDescriptor};
use wp_db::{export_snapshot, restore_snapshot, ConfigStore, LockHandle, TargetDb};

/// Delegate for services speaking the upgrade protocol.
pub struct UpgradeServiceDelegate<S: UpgradeService> {
    service: S,
    config: RemoteConfig,
    policy: RetryPolicy,
}

impl<S: UpgradeService> UpgradeServiceDelegate<S> {
    pub fn new(service: S, config: RemoteConfig) -> Self {
        let policy = RetryPolicy::from_config(&config.transfer);
        Self {
            service,
            config,
            policy,
        }
    }

    /// Override the transfer retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The wrapped service.
    pub fn service(&self) -> &S {
        &self.service
    }

    fn snapshot_name(db: &TargetDb) -> EngineResult<String> {
        Ok(format!("{}.duckdb", db.database_name()?))
    }

    /// Resume or open the request for `step`.
    async fn open_request(
        &self,
        store: &ConfigStore<'_>,
        credentials: &ServiceCredentials,
        step: &StepDescriptor,
        db: &TargetDb,
    ) -> EngineResult<RequestState> {
        if let Some(state) = RequestState::load(store)? {
            log::info!(
                "Resuming upgrade request {} at stage '{}'",
                state.ticket.request_id,
                state.stage.as_str()
            );
            return Ok(state);
        }
        let request = CreateRequest {
            contract: credentials.contract.clone(),
            email: credentials.email.clone(),
            target: step.app_version().to_string(),
            aim: self.config.mode.as_str().to_string(),
            filename: Self::snapshot_name(db)?,
        };
        let ticket = self.service.create(&request).await?;
        log::info!(
            "Opened upgrade request {} for {} ({})",
            ticket.request_id,
            step.version(),
            self.config.mode
        );
        let state = RequestState::new(ticket);
        state.save(store)?;
        Ok(state)
    }

    /// Refresh transfer access and persist it.
    async fn grant_access(
        &self,
        store: &ConfigStore<'_>,
        credentials: &ServiceCredentials,
        state: &mut RequestState,
    ) -> EngineResult<TransferAccess> {
        let access = self
            .service
            .request_transfer_access(&state.ticket, &credentials.public_key)
            .await?;
        state.access = Some(access.clone());
        state.save(store)?;
        Ok(access)
    }

    /// Drive the request up to processing.
    async fn advance(
        &self,
        store: &ConfigStore<'_>,
        credentials: &ServiceCredentials,
        mut state: RequestState,
        db: &TargetDb,
    ) -> EngineResult<()> {
        if state.stage < RequestStage::Uploaded {
            let access = self.grant_access(store, credentials, &mut state).await?;
            let workdir = tempfile::tempdir()?;
            let snapshot = workdir.path().join(Self::snapshot_name(db)?);
            export_snapshot(db, &snapshot)?;
            let sign = credentials.signer()?;
            let bytes = self
                .transfer(&state, &access)
                .upload(&snapshot, &sign)
                .await?;
            log::info!("Uploaded {bytes} bytes for request {}", state.ticket.request_id);
            state.stage = RequestStage::Uploaded;
            state.save(store)?;
        }
        if state.stage < RequestStage::Processing {
            self.trigger_processing(&state).await?;
            state.stage = RequestStage::Processing;
            state.save(store)?;
        }
        Ok(())
    }

    async fn trigger_processing(&self, state: &RequestState) -> EngineResult<()> {
        if state.stage < RequestStage::Uploaded {
            return Err(EngineError::NotUploaded);
        }
        self.service.process(&state.ticket).await?;
        log::info!("Processing started for request {}", state.ticket.request_id);
        Ok(())
    }

    fn transfer<'a>(
        &'a self,
        state: &'a RequestState,
        access: &'a TransferAccess,
    ) -> Transfer<'a, S> {
        Transfer {
            service: &self.service,
            ticket: &state.ticket,
            access,
            policy: &self.policy,
            chunk_size: self.config.transfer.chunk_size,
        }
    }

    /// Download the result and swap it into the target database.
    async fn restore_result(
        &self,
        store: &ConfigStore<'_>,
        credentials: &ServiceCredentials,
        mut state: RequestState,
        db: &TargetDb,
        lock: &mut LockHandle,
    ) -> EngineResult<()> {
        let access = self.grant_access(store, credentials, &mut state).await?;
        let workdir = tempfile::tempdir()?;
        let download = workdir.path().join(format!("upgraded-{}", Self::snapshot_name(db)?));
        let sign = credentials.signer()?;
        let bytes = self
            .transfer(&state, &access)
            .download(&download, &sign)
            .await?;
        log::info!("Downloaded {bytes} bytes for request {}", state.ticket.request_id);

        lock.stop().await?;
        let restored = restore_snapshot(db, &download);
        lock.restart(db).await?;
        restored?;

        // The restored database carries the request as it was at upload time.
        RequestState::clear(store)?;
        Ok(())
    }
}

#[async_trait]
impl<S: UpgradeService> RemoteDelegate for UpgradeServiceDelegate<S> {
    async fn submit(
        &self,
        service: ServiceName,
        step: &StepDescriptor,
        db: &TargetDb,
        lock: &mut LockHandle,
    ) -> EngineResult<()> {
        lock.check()?;
        log::info!("Submitting {} to the {service} upgrade service", step.version());
        let store = ConfigStore::new(db);
        let credentials = ServiceCredentials::load(&store, &self.config)?;
        let state = self.open_request(&store, &credentials, step, db).await?;
        self.advance(&store, &credentials, state, db).await
    }

    async fn retrieve(
        &self,
        service: ServiceName,
        step: &StepDescriptor,
        db: &TargetDb,
        lock: &mut LockHandle,
    ) -> EngineResult<RemoteOutcome> {
        lock.check()?;
        let store = ConfigStore::new(db);
        let credentials = ServiceCredentials::load(&store, &self.config)?;

        let state = match RequestState::load(&store)? {
            Some(state) if state.stage == RequestStage::Processing => state,
            _ => {
                log::warn!(
                    "Upgrade of {} was not fully submitted to {service}, resuming submission",
                    step.version()
                );
                let state = self.open_request(&store, &credentials, step, db).await?;
                self.advance(&store, &credentials, state, db).await?;
                return Ok(RemoteOutcome::Pending);
            }
        };

        match self.service.status(&state.ticket).await? {
            RequestStatus::Done => {
                log::info!("{service} finished upgrading {}", step.version());
                self.restore_result(&store, &credentials, state, db, lock)
                    .await?;
                Ok(RemoteOutcome::Finished)
            }
            RequestStatus::Failed(reason) => {
                RequestState::clear(&store)?;
                Ok(RemoteOutcome::Failed(reason))
            }
            RequestStatus::Cancelled => {
                RequestState::clear(&store)?;
                Ok(RemoteOutcome::Failed("request was cancelled".to_string()))
            }
            RequestStatus::Pending | RequestStatus::Progress => {
                log::info!(
                    "Upgrade request {} for {} is not ready yet",
                    state.ticket.request_id,
                    step.version()
                );
                Ok(RemoteOutcome::Pending)
            }
        }
    }
}

#[cfg(test)]
#[path = "delegate_test.rs"]
mod tests;
