//! Check command implementation

use anyhow::Result;
use std::collections::HashSet;
use wp_core::StepDescriptor;
use wp_db::VersionLedger;

use crate::cli::{CheckArgs, GlobalArgs};
use crate::commands::common::plural;
use crate::context::RuntimeContext;

/// Execute the check command
pub async fn execute(args: &CheckArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let steps = ctx.load_steps(args.file.as_deref())?;
    println!(
        "{}: {} valid",
        ctx.steps_path(args.file.as_deref()).display(),
        plural(steps.len(), "step")
    );

    let db = ctx.open_database()?;
    let finished: HashSet<_> = VersionLedger::read_only(&db)
        .finished_versions()?
        .into_iter()
        .collect();

    for step in &steps {
        let marker = if finished.contains(step.version()) {
            "done"
        } else {
            "todo"
        };
        println!("  [{marker}] {:<12} {}", step.version().to_string(), describe(step));
    }
    Ok(())
}

/// One-line summary of what a step does.
fn describe(step: &StepDescriptor) -> String {
    let ops = step.operations();
    let mut parts = Vec::new();
    if let Some(service) = ops.service {
        parts.push(format!("service {service}"));
    }
    for (label, modules) in [
        ("upgrade", &ops.upgrade),
        ("install", &ops.install),
        ("uninstall", &ops.uninstall),
        ("remove", &ops.remove),
    ] {
        if !modules.is_empty() {
            let names: Vec<&str> = modules.iter().map(|m| m.as_str()).collect();
            parts.push(format!("{label} {}", names.join(",")));
        }
    }
    let scripts = ops.pre_scripts.len() + ops.post_scripts.len();
    if scripts > 0 {
        parts.push(plural(scripts, "script"));
    }
    if parts.is_empty() {
        format!("app {} (no-op)", step.app_version())
    } else {
        format!("app {}: {}", step.app_version(), parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wp_core::{ModuleName, Operations, ServiceName, Version};

    #[test]
    fn test_describe_lists_operations() {
        let step = StepDescriptor::new(
            Version::new(1, 0, 0),
            "17.0",
            Operations {
                service: Some(ServiceName::Odoo),
                install: vec![ModuleName::new("sale"), ModuleName::new("stock")],
                post_scripts: vec![PathBuf::from("fix.sql")],
                ..Operations::default()
            },
        );
        assert_eq!(
            describe(&step),
            "app 17.0: service odoo; install sale,stock; 1 script"
        );
    }

    #[test]
    fn test_describe_noop() {
        let step = StepDescriptor::new(Version::new(0, 0, 1), "16.0", Operations::default());
        assert_eq!(describe(&step), "app 16.0 (no-op)");
    }
}
