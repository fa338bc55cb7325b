//! Migration sequencing
//!
//! The sequencer matches the step document against the version ledger and
//! drives every pending step to completion in ascending version order. It is
//! the only writer of ledger entries. A step either runs locally, in which
//! case it is started, executed and finished in one pass, or is delegated to
//! a remote upgrade service, in which case the run stops after submission and
//! a later run collects the result.

use crate::error::{EngineError, EngineResult};
use crate::operations::{ModuleInstaller, ScriptRunner};
use crate::remote::{RemoteDelegate, RemoteOutcome};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use wp_core::version::join_versions;
use wp_core::{ModuleName, ServiceName, StepDescriptor, Version};
use wp_db::{LedgerEntry, LockHandle, StepState, TargetDb, VersionLedger};

/// Why a run stopped before reaching the end of the pending steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "version", rename_all = "snake_case")]
pub enum Halt {
    /// A step was handed to its remote service
    Submitted(Version),
    /// A previously submitted step is still being processed remotely
    RemoteNotReady(Version),
}

impl Halt {
    /// Version of the step the run stopped at.
    pub fn version(&self) -> &Version {
        match self {
            Halt::Submitted(version) | Halt::RemoteNotReady(version) => version,
        }
    }
}

/// Outcome of one sequencer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Steps finished by this run, in order
    pub applied: Vec<Version>,

    /// Pending steps that turned out to be finished already
    pub skipped: Vec<Version>,

    /// Set when the run stopped early on a remote step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<Halt>,
}

impl RunReport {
    /// True when the run reached the end of the pending steps.
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

/// Drives migration steps against one target database.
pub struct Sequencer<'a> {
    db: &'a TargetDb,
    ledger: VersionLedger<'a>,
    steps: Vec<StepDescriptor>,
    installer: &'a dyn ModuleInstaller,
    scripts: &'a dyn ScriptRunner,
    remote: Option<&'a dyn RemoteDelegate>,
    since: Option<Version>,
    until: Option<Version>,
}

impl<'a> Sequencer<'a> {
    /// Build a sequencer over `steps`, which are put in version order.
    pub fn new(
        db: &'a TargetDb,
        mut steps: Vec<StepDescriptor>,
        installer: &'a dyn ModuleInstaller,
        scripts: &'a dyn ScriptRunner,
    ) -> EngineResult<Self> {
        steps.sort_by(|a, b| a.version().cmp(b.version()));
        Ok(Self {
            db,
            ledger: VersionLedger::new(db)?,
            steps,
            installer,
            scripts,
            remote: None,
            since: None,
            until: None,
        })
    }

    /// Enable remote delegation for steps that declare a service.
    pub fn with_remote(mut self, remote: &'a dyn RemoteDelegate) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Restrict the run to versions after `since`.
    pub fn since(mut self, since: Option<Version>) -> Self {
        self.since = since;
        self
    }

    /// Restrict the run to versions up to and including `until`.
    pub fn until(mut self, until: Option<Version>) -> Self {
        self.until = until;
        self
    }

    /// All steps, in execution order.
    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    /// The ledger the sequencer writes to.
    pub fn ledger(&mut self) -> &mut VersionLedger<'a> {
        &mut self.ledger
    }

    /// Steps selected by the bounds, in ascending version order.
    ///
    /// With both bounds the window `since < v <= until` is taken as is, and
    /// with only `since` every later step is taken, so finished steps may be
    /// selected again and are then skipped by [`Sequencer::run`]. Without
    /// `since`, finished steps are left out.
    pub fn compute_pending(
        &mut self,
        since: Option<&Version>,
        until: Option<&Version>,
    ) -> EngineResult<Vec<StepDescriptor>> {
        let finished: HashSet<Version> = self.ledger.finished_versions()?.into_iter().collect();
        let selected = self
            .steps
            .iter()
            .filter(|step| {
                let v = step.version();
                match (since, until) {
                    (Some(since), Some(until)) => v > since && v <= until,
                    (Some(since), None) => v > since,
                    (None, Some(until)) => v <= until && !finished.contains(v),
                    (None, None) => !finished.contains(v),
                }
            })
            .cloned()
            .collect();
        Ok(selected)
    }

    /// Run every pending step, stopping early at remote steps.
    ///
    /// Execution errors leave the failing step started in the ledger; the
    /// next run refuses to proceed until an operator resolves it. While a
    /// step is held by a remote service, it must be the first pending step
    /// and nothing else runs before it is collected.
    pub async fn run(&mut self, lock: &mut LockHandle) -> EngineResult<RunReport> {
        let (since, until) = (self.since.clone(), self.until.clone());
        let pending = self.compute_pending(since.as_ref(), until.as_ref())?;
        self.check_preconditions(since.as_ref(), &pending)?;

        if pending.is_empty() {
            log::info!("No pending migrations");
        } else {
            log::info!(
                "{} pending migration(s): {} to {}",
                pending.len(),
                pending[0].version(),
                pending[pending.len() - 1].version()
            );
        }

        let mut report = RunReport::default();
        for step in &pending {
            lock.check()?;
            let version = step.version();
            let entry = self.ledger.entry(version)?;

            match entry.as_ref().map(LedgerEntry::state) {
                Some(StepState::Finished) => {
                    log::info!("Migration {version} already finished, skipping");
                    report.skipped.push(version.clone());
                    continue;
                }
                Some(StepState::PendingRemote) => {
                    // PendingRemote entries always carry their service.
                    let Some(service) = entry.as_ref().and_then(|e| e.service) else {
                        continue;
                    };
                    let remote = self.remote_for(version, service)?;
                    match remote.retrieve(service, step, self.db, lock).await? {
                        RemoteOutcome::Pending => {
                            log::info!("Migration {version} is still processing on {service}");
                            report.halted = Some(Halt::RemoteNotReady(version.clone()));
                            return Ok(report);
                        }
                        RemoteOutcome::Failed(reason) => {
                            self.ledger.mark_failed(version, &reason)?;
                            return Err(EngineError::RemoteFailed {
                                version: version.to_string(),
                                reason,
                            });
                        }
                        RemoteOutcome::Finished => {
                            // The database was replaced underneath the ledger.
                            self.ledger.invalidate();
                            match self.ledger.entry(version)?.map(|e| e.state()) {
                                Some(StepState::Finished) => {
                                    log::info!("Migration {version} finished remotely");
                                    report.applied.push(version.clone());
                                    continue;
                                }
                                Some(_) => {}
                                None => self.start(step)?,
                            }
                            // From here on a failure blocks the next run.
                            self.ledger.mark_restored(version)?;
                        }
                    }
                }
                Some(state @ (StepState::Started | StepState::RemoteFailed)) => {
                    log::error!("Migration {version} is {state}");
                    return Err(EngineError::Unfinished {
                        versions: version.to_string(),
                    });
                }
                None => {
                    self.start(step)?;
                    if let Some(service) = step.service() {
                        let remote = self.remote_for(version, service)?;
                        remote.submit(service, step, self.db, lock).await?;
                        log::info!("Migration {version} submitted to {service}");
                        report.halted = Some(Halt::Submitted(version.clone()));
                        return Ok(report);
                    }
                }
            }

            self.execute(step)?;
            self.ledger.finish(version, now(), step.operations())?;
            log::info!("Migration {version} finished");
            report.applied.push(version.clone());
        }
        Ok(report)
    }

    fn check_preconditions(
        &mut self,
        since: Option<&Version>,
        pending: &[StepDescriptor],
    ) -> EngineResult<()> {
        if let Some(since) = since {
            let finished = self.ledger.finished_versions()?;
            let latest = finished.iter().max();
            if !finished.contains(since) || latest.is_some_and(|latest| since < latest) {
                return Err(EngineError::Gap {
                    finished: latest
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "none".to_string()),
                    since: since.to_string(),
                });
            }
        }

        let unfinished = self.ledger.unfinished_entries()?;
        if !unfinished.is_empty() {
            for entry in &unfinished {
                match &entry.failure {
                    Some(failure) => log::error!("Migration {} failed remotely: {failure}", entry.number),
                    None => log::error!("Migration {} did not finish", entry.number),
                }
            }
            return Err(EngineError::Unfinished {
                versions: join_versions(unfinished.iter().map(|e| &e.number)),
            });
        }

        let in_flight = self.ledger.pending_remote_entries()?;
        if let Some(entry) = in_flight.first() {
            let next = pending.first().map(StepDescriptor::version);
            if in_flight.len() > 1 || next != Some(&entry.number) {
                log::error!(
                    "Migration {} is still held by a remote service, next pending step is {}",
                    entry.number,
                    next.map(ToString::to_string)
                        .unwrap_or_else(|| "none".to_string())
                );
                return Err(EngineError::RemoteInFlight {
                    versions: join_versions(in_flight.iter().map(|e| &e.number)),
                });
            }
        }

        if self.remote.is_none() {
            if let Some(step) = pending.iter().find(|s| s.service().is_some()) {
                return Err(EngineError::RemoteNotConfigured {
                    version: step.version().to_string(),
                    service: step.service().map(|s| s.to_string()).unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    fn remote_for(
        &self,
        version: &Version,
        service: ServiceName,
    ) -> EngineResult<&'a dyn RemoteDelegate> {
        self.remote.ok_or_else(|| EngineError::RemoteNotConfigured {
            version: version.to_string(),
            service: service.to_string(),
        })
    }

    fn start(&mut self, step: &StepDescriptor) -> EngineResult<()> {
        log::info!("Starting migration {} ({})", step.version(), step.app_version());
        self.ledger
            .start(step.version(), step.app_version(), now(), step.service())?;
        Ok(())
    }

    /// Local operations, in their fixed order.
    fn execute(&self, step: &StepDescriptor) -> EngineResult<()> {
        if step.is_noop() {
            log::info!("Migration {} has no operations", step.version());
            return Ok(());
        }
        let ops = step.operations();

        for script in &ops.pre_scripts {
            log::info!("Running pre script {}", script.display());
            self.scripts.run_script(self.db, script)?;
        }

        if ops.reconciles_modules() {
            self.installer.update_list(self.db)?;
            if !ops.upgrade.is_empty() {
                log::info!("Upgrading modules: {}", join(&ops.upgrade));
                self.installer.button_upgrade(self.db, &ops.upgrade)?;
            }
            if !ops.install.is_empty() {
                log::info!("Installing modules: {}", join(&ops.install));
                self.installer.button_install(self.db, &ops.install)?;
            }
            if !ops.uninstall.is_empty() {
                log::info!("Uninstalling modules: {}", join(&ops.uninstall));
                self.installer.button_uninstall(self.db, &ops.uninstall)?;
            }
            self.installer.reconcile(self.db)?;
        }

        if !ops.remove.is_empty() {
            log::info!("Removing modules: {}", join(&ops.remove));
            self.installer.remove(self.db, &ops.remove)?;
        }

        for script in &ops.post_scripts {
            log::info!("Running post script {}", script.display());
            self.scripts.run_script(self.db, script)?;
        }
        Ok(())
    }
}

fn join(modules: &[ModuleName]) -> String {
    modules
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[cfg(test)]
#[path = "sequencer_test.rs"]
mod tests;
