//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand};

/// Waypoint - versioned migration sequencing for application databases
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to project directory
    #[arg(short = 'p', long, global = true, default_value = ".")]
    pub project_dir: String,

    /// Override config file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Override target database path
    #[arg(short, long, global = true, env = "WAYPOINT_DATABASE")]
    pub database: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending migration steps
    Migrate(MigrateArgs),

    /// Show the migration ledger
    Status(StatusArgs),

    /// Mark an interrupted step as finished after manual repair
    Resolve(ResolveArgs),

    /// Validate the step document and show what would run
    Check(CheckArgs),
}

/// Arguments for the migrate command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Step document (default: migrations_file from config)
    #[arg(short, long)]
    pub file: Option<String>,

    /// Last finished version to continue from
    #[arg(long)]
    pub since: Option<String>,

    /// Last version to apply
    #[arg(long)]
    pub until: Option<String>,

    /// Delegate steps that declare a service (default)
    #[arg(long, overrides_with = "no_remote")]
    pub remote: bool,

    /// Refuse steps that declare a service
    #[arg(long, overrides_with = "remote")]
    pub no_remote: bool,
}

impl MigrateArgs {
    /// Whether remote delegation is enabled.
    pub fn remote_enabled(&self) -> bool {
        !self.no_remote
    }
}

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print entries as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the resolve command
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Version of the interrupted step
    pub version: String,

    /// Step document (default: migrations_file from config)
    #[arg(short, long)]
    pub file: Option<String>,
}

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Step document (default: migrations_file from config)
    #[arg(short, long)]
    pub file: Option<String>,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
