//! Status command implementation

use anyhow::{Context, Result};
use serde::Serialize;
use wp_core::Operations;
use wp_db::{LedgerEntry, VersionLedger};

use crate::cli::{GlobalArgs, StatusArgs};
use crate::commands::common::plural;
use crate::context::RuntimeContext;

/// Ledger entry for display
#[derive(Debug, Serialize)]
struct EntryInfo {
    version: String,
    app_version: String,
    state: String,
    started: String,
    finished: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operations: Option<Operations>,
}

impl From<&LedgerEntry> for EntryInfo {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            version: entry.number.to_string(),
            app_version: entry.app_version.clone(),
            state: entry.state().to_string(),
            started: entry.date_start.format("%Y-%m-%d %H:%M:%S").to_string(),
            finished: entry
                .date_done
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string()),
            service: entry.service.map(|s| s.to_string()),
            failure: entry.failure.clone(),
            operations: entry.operations.clone(),
        }
    }
}

/// Execute the status command
pub async fn execute(args: &StatusArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let db = ctx.open_database()?;
    let entries = VersionLedger::read_only(&db)
        .list_entries()
        .context("Failed to read the migration ledger")?;
    let infos: Vec<EntryInfo> = entries.iter().map(EntryInfo::from).collect();

    if args.json {
        print_json(&infos)
    } else {
        print_table(&infos);
        Ok(())
    }
}

fn print_table(entries: &[EntryInfo]) {
    if entries.is_empty() {
        println!("No migrations recorded");
        return;
    }

    let version_width = entries
        .iter()
        .map(|e| e.version.len())
        .max()
        .unwrap_or(7)
        .max(7);
    let app_width = entries
        .iter()
        .map(|e| e.app_version.len())
        .max()
        .unwrap_or(3)
        .max(3);
    let state_width = 14;
    let date_width = 19;

    println!(
        "{:<version_width$}  {:<app_width$}  {:<state_width$}  {:<date_width$}  {:<date_width$}  SERVICE",
        "VERSION", "APP", "STATE", "STARTED", "FINISHED",
    );
    println!(
        "{:-<version_width$}  {:-<app_width$}  {:-<state_width$}  {:-<date_width$}  {:-<date_width$}  {}",
        "",
        "",
        "",
        "",
        "",
        "-".repeat(7),
    );

    for entry in entries {
        println!(
            "{:<version_width$}  {:<app_width$}  {:<state_width$}  {:<date_width$}  {:<date_width$}  {}",
            entry.version,
            entry.app_version,
            entry.state,
            entry.started,
            entry.finished.as_deref().unwrap_or("-"),
            entry.service.as_deref().unwrap_or("-"),
        );
        if let Some(failure) = &entry.failure {
            println!("    failure: {failure}");
        }
    }

    let finished = entries.iter().filter(|e| e.finished.is_some()).count();
    println!();
    println!(
        "{} recorded, {finished} finished",
        plural(entries.len(), "migration")
    );
}

fn print_json(entries: &[EntryInfo]) -> Result<()> {
    let json = serde_json::to_string_pretty(entries).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}
