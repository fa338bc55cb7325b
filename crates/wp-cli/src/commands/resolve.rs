//! Resolve command implementation

use anyhow::{Context, Result};
use wp_core::{Operations, Version};
use wp_db::{LockHandle, VersionLedger};

use crate::cli::{GlobalArgs, ResolveArgs};
use crate::context::RuntimeContext;

/// Execute the resolve command
pub async fn execute(args: &ResolveArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let version = Version::parse(&args.version).context("Invalid version")?;
    let steps = ctx.load_steps(args.file.as_deref())?;
    let operations = match steps.iter().find(|s| s.version() == &version) {
        Some(step) => step.operations().clone(),
        None => {
            log::warn!("Migration {version} is not in the step document, recording no operations");
            Operations::default()
        }
    };
    let db = ctx.open_database()?;
    let mut lock = LockHandle::acquire(&db, ctx.lock_settings())
        .await
        .context("Could not take the migration lock")?;

    let resolved = VersionLedger::new(&db)
        .and_then(|mut ledger| {
            ledger.resolve(&version, chrono::Utc::now().naive_utc(), &operations)
        })
        .with_context(|| format!("Cannot resolve migration {version}"));
    let released = lock.release().await;

    let previous = resolved?;
    released.context("Failed to release the migration lock")?;
    log::warn!("Migration {version} marked finished by operator (was {previous})");
    println!("Migration {version} is now finished (was {previous})");
    Ok(())
}
