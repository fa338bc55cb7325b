//! Migrate command implementation

use anyhow::{Context, Result};
use wp_core::{StepDescriptor, Version};
use wp_db::{LockHandle, TargetDb};
use wp_engine::{
    Halt, HttpUpgradeService, ModuleRegistry, RunReport, Sequencer, SqlScriptRunner,
    UpgradeServiceDelegate,
};

use crate::cli::{GlobalArgs, MigrateArgs};
use crate::commands::common::{parse_bound, plural};
use crate::context::RuntimeContext;

/// Execute the migrate command
pub async fn execute(args: &MigrateArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let steps = ctx.load_steps(args.file.as_deref())?;
    let since = parse_bound(args.since.as_deref(), "--since")?;
    let until = parse_bound(args.until.as_deref(), "--until")?;

    let db = ctx.open_database()?;
    let mut lock = LockHandle::acquire(&db, ctx.lock_settings())
        .await
        .context("Could not take the migration lock")?;
    log::debug!("Holding migration lock {} as {}", lock.ident(), lock.holder());

    let outcome = run(&ctx, args, &db, steps, since, until, &mut lock).await;
    let released = lock.release().await;

    let report = outcome?;
    released.context("Failed to release the migration lock")?;
    print_report(&report);
    Ok(())
}

async fn run(
    ctx: &RuntimeContext,
    args: &MigrateArgs,
    db: &TargetDb,
    steps: Vec<StepDescriptor>,
    since: Option<Version>,
    until: Option<Version>,
    lock: &mut LockHandle,
) -> Result<RunReport> {
    let registry = ModuleRegistry::new();
    let runner = SqlScriptRunner::new(ctx.scripts_dir());
    let delegate = if args.remote_enabled() {
        let remote = &ctx.config.remote;
        let service = HttpUpgradeService::new(&remote.base_url)
            .context("Failed to set up the upgrade service client")?;
        Some(UpgradeServiceDelegate::new(service, remote.clone()))
    } else {
        None
    };

    let mut sequencer = Sequencer::new(db, steps, &registry, &runner)?
        .since(since)
        .until(until);
    if let Some(delegate) = &delegate {
        sequencer = sequencer.with_remote(delegate);
    }
    sequencer.run(lock).await.context("Migration failed")
}

fn print_report(report: &RunReport) {
    if !report.skipped.is_empty() {
        println!(
            "Skipped {} already finished",
            plural(report.skipped.len(), "migration")
        );
    }
    for version in &report.applied {
        println!("  Applied {version}");
    }

    match &report.halted {
        Some(Halt::Submitted(version)) => println!(
            "Migration {version} was submitted to the upgrade service. \
             Run `waypoint migrate` again to collect the result."
        ),
        Some(Halt::RemoteNotReady(version)) => println!(
            "Migration {version} is still being processed by the upgrade service. \
             Run `waypoint migrate` again later."
        ),
        None if report.applied.is_empty() => println!("Database is up to date"),
        None => println!("Applied {}", plural(report.applied.len(), "migration")),
    }
}
