//! Runtime context for CLI commands

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use wp_core::step::load_file;
use wp_core::{Config, StepDescriptor};
use wp_db::connection::IN_MEMORY;
use wp_db::{LockSettings, TargetDb};

use crate::cli::GlobalArgs;

/// Resolved project configuration shared by the commands
pub struct RuntimeContext {
    /// Project directory relative paths resolve against
    pub root: PathBuf,

    /// Loaded configuration with command line overrides applied
    pub config: Config,
}

impl RuntimeContext {
    /// Create a new runtime context from global arguments
    pub fn new(args: &GlobalArgs) -> Result<Self> {
        let root = PathBuf::from(&args.project_dir);

        let mut config = match &args.config {
            Some(config_path) => {
                Config::load(Path::new(config_path)).context("Failed to load configuration file")?
            }
            None => Config::load_from_dir(&root).context("Failed to load project configuration")?,
        };

        if let Some(database) = &args.database {
            config.database.path = database.clone();
        }
        config.validate().context("Invalid configuration")?;

        Ok(Self { root, config })
    }

    /// Database path with relative paths resolved against the project
    pub fn database_path(&self) -> String {
        let path = &self.config.database.path;
        if path == IN_MEMORY || Path::new(path).is_absolute() {
            path.clone()
        } else {
            self.root.join(path).display().to_string()
        }
    }

    /// Open the target database
    pub fn open_database(&self) -> Result<TargetDb> {
        let path = self.database_path();
        log::debug!("Opening target database {path}");
        TargetDb::new(&path).with_context(|| format!("Failed to open database {path}"))
    }

    /// Step document path, from `--file` or the configuration
    pub fn steps_path(&self, file: Option<&str>) -> PathBuf {
        match file {
            Some(file) => PathBuf::from(file),
            None => self.config.migrations_file_absolute(&self.root),
        }
    }

    /// Load and validate the step document
    pub fn load_steps(&self, file: Option<&str>) -> Result<Vec<StepDescriptor>> {
        let path = self.steps_path(file);
        load_file(&path).with_context(|| format!("Failed to load steps from {}", path.display()))
    }

    /// Base directory for relative script paths
    pub fn scripts_dir(&self) -> PathBuf {
        self.config.scripts_dir_absolute(&self.root)
    }

    /// Lock settings derived from the configuration
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings::from_config(&self.config.lock)
    }
}
