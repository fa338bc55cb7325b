//! Host application collaborators: module installer and script runner.
//!
//! The sequencer only decides *when* modules are marked and scripts run; what
//! marking or running means is up to these traits. The default
//! implementations keep a module registry table in the target database and
//! execute scripts as SQL batches.

use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};
use wp_core::ModuleName;
use wp_db::TargetDb;

/// Module lifecycle operations of the host application.
pub trait ModuleInstaller: Send + Sync {
    /// Refresh the list of available modules.
    fn update_list(&self, db: &TargetDb) -> EngineResult<()>;

    /// Mark installed modules for upgrade.
    fn button_upgrade(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()>;

    /// Mark modules for installation.
    fn button_install(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()>;

    /// Mark installed modules for removal.
    fn button_uninstall(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()>;

    /// Apply all pending marks in one pass.
    fn reconcile(&self, db: &TargetDb) -> EngineResult<()>;

    /// Purge modules whose code no longer exists.
    fn remove(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()>;
}

/// Raw script execution hook.
///
/// The script receives the open database session and nothing else.
pub trait ScriptRunner: Send + Sync {
    fn run_script(&self, db: &TargetDb, path: &Path) -> EngineResult<()>;
}

/// Module registry table name.
pub const MODULE_TABLE: &str = "waypoint_module";

/// State of a module in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Uninstalled,
    Installed,
    ToInstall,
    ToUpgrade,
    ToRemove,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Uninstalled => "uninstalled",
            ModuleState::Installed => "installed",
            ModuleState::ToInstall => "to install",
            ModuleState::ToUpgrade => "to upgrade",
            ModuleState::ToRemove => "to remove",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uninstalled" => Some(ModuleState::Uninstalled),
            "installed" => Some(ModuleState::Installed),
            "to install" => Some(ModuleState::ToInstall),
            "to upgrade" => Some(ModuleState::ToUpgrade),
            "to remove" => Some(ModuleState::ToRemove),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of applying a mark to a module's current state.
enum Mark {
    Set(ModuleState),
    Keep,
    Reject,
}

/// Default installer: a `waypoint_module (name, state)` table in the target.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry;

impl ModuleRegistry {
    pub fn new() -> Self {
        Self
    }

    fn ensure_table(db: &TargetDb) -> EngineResult<()> {
        db.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {MODULE_TABLE} (
                 name  VARCHAR NOT NULL PRIMARY KEY,
                 state VARCHAR NOT NULL DEFAULT 'uninstalled'
             );"
        ))?;
        Ok(())
    }

    /// Current state of `name`, `None` if unknown.
    pub fn state(&self, db: &TargetDb, name: &str) -> EngineResult<Option<ModuleState>> {
        Self::ensure_table(db)?;
        let raw: Option<String> = db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT state FROM {MODULE_TABLE} WHERE name = ?"))?;
            let mut rows = stmt.query([name])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })?;
        Ok(raw.as_deref().and_then(ModuleState::from_name))
    }

    fn set_state(db: &TargetDb, name: &str, state: ModuleState) -> EngineResult<()> {
        db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {MODULE_TABLE} (name, state) VALUES (?, ?) \
                     ON CONFLICT (name) DO UPDATE SET state = excluded.state"
                ),
                [name, state.as_str()],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Mark each module, rejecting modules whose current state forbids it.
    fn mark(
        &self,
        db: &TargetDb,
        modules: &[ModuleName],
        action: &str,
        transition: impl Fn(Option<ModuleState>) -> Mark,
    ) -> EngineResult<()> {
        Self::ensure_table(db)?;
        for module in modules {
            let current = self.state(db, module)?;
            match transition(current) {
                Mark::Set(next) => {
                    log::debug!("Module {module}: {action} -> {next}");
                    Self::set_state(db, module, next)?;
                }
                Mark::Keep => log::debug!("Module {module}: {action} not needed"),
                Mark::Reject => {
                    return Err(match current {
                        None => EngineError::ModuleNotFound {
                            name: module.to_string(),
                        },
                        Some(state) => EngineError::ModuleState {
                            name: module.to_string(),
                            action: action.to_string(),
                            state: state.to_string(),
                        },
                    })
                }
            }
        }
        Ok(())
    }
}

impl ModuleInstaller for ModuleRegistry {
    fn update_list(&self, db: &TargetDb) -> EngineResult<()> {
        Self::ensure_table(db)?;
        let known: i64 = db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {MODULE_TABLE}"), [], |row| {
                row.get(0)
            })?)
        })?;
        log::debug!("Module registry lists {known} modules");
        Ok(())
    }

    fn button_upgrade(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()> {
        self.mark(db, modules, "upgrade", |state| match state {
            Some(ModuleState::Installed) => Mark::Set(ModuleState::ToUpgrade),
            Some(ModuleState::ToUpgrade) => Mark::Keep,
            _ => Mark::Reject,
        })
    }

    fn button_install(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()> {
        self.mark(db, modules, "install", |state| match state {
            None | Some(ModuleState::Uninstalled) => Mark::Set(ModuleState::ToInstall),
            Some(ModuleState::ToInstall) | Some(ModuleState::Installed) => Mark::Keep,
            _ => Mark::Reject,
        })
    }

    fn button_uninstall(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()> {
        self.mark(db, modules, "uninstall", |state| match state {
            Some(ModuleState::Installed) | Some(ModuleState::ToUpgrade) => {
                Mark::Set(ModuleState::ToRemove)
            }
            Some(ModuleState::ToRemove) | Some(ModuleState::Uninstalled) => Mark::Keep,
            _ => Mark::Reject,
        })
    }

    fn reconcile(&self, db: &TargetDb) -> EngineResult<()> {
        Self::ensure_table(db)?;
        let changed = db.transaction(|conn| {
            let installed = conn.execute(
                &format!(
                    "UPDATE {MODULE_TABLE} SET state = 'installed' \
                     WHERE state IN ('to install', 'to upgrade')"
                ),
                [],
            )?;
            let removed = conn.execute(
                &format!(
                    "UPDATE {MODULE_TABLE} SET state = 'uninstalled' WHERE state = 'to remove'"
                ),
                [],
            )?;
            Ok(installed + removed)
        })?;
        log::info!("Module reconciliation applied {changed} change(s)");
        Ok(())
    }

    fn remove(&self, db: &TargetDb, modules: &[ModuleName]) -> EngineResult<()> {
        Self::ensure_table(db)?;
        for module in modules {
            let deleted = db.with_conn(|conn| {
                Ok(conn.execute(
                    &format!("DELETE FROM {MODULE_TABLE} WHERE name = ?"),
                    [module.as_str()],
                )?)
            })?;
            if deleted == 0 {
                log::warn!("Module {module} is not in the registry, nothing to remove");
            } else {
                log::info!("Removed module {module} from the registry");
            }
        }
        Ok(())
    }
}

/// Default script runner: executes the file as a SQL batch.
#[derive(Debug, Clone)]
pub struct SqlScriptRunner {
    base_dir: PathBuf,
}

impl SqlScriptRunner {
    /// Relative script paths resolve against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl ScriptRunner for SqlScriptRunner {
    fn run_script(&self, db: &TargetDb, path: &Path) -> EngineResult<()> {
        let full = self.resolve(path);
        let sql = std::fs::read_to_string(&full).map_err(|e| EngineError::Script {
            path: full.display().to_string(),
            message: e.to_string(),
        })?;
        log::debug!("Executing {} as a SQL batch", full.display());
        db.execute_batch(&sql).map_err(|e| EngineError::Script {
            path: full.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "operations_test.rs"]
mod tests;
