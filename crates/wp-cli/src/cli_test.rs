use super::*;
use clap::{CommandFactory, Parser};

#[test]
fn test_verify_cli_args() {
    // Validates the entire command tree: short flag conflicts,
    // duplicate args, and other clap definition errors.
    Cli::command().debug_assert();
}

#[test]
fn test_migrate_bounds_and_remote_flags() {
    let cli = Cli::try_parse_from([
        "waypoint",
        "migrate",
        "--since",
        "0.1.0",
        "--until",
        "0.2.0",
        "--no-remote",
    ])
    .unwrap();
    let Commands::Migrate(args) = cli.command else {
        panic!("expected migrate");
    };
    assert_eq!(args.since.as_deref(), Some("0.1.0"));
    assert_eq!(args.until.as_deref(), Some("0.2.0"));
    assert!(!args.remote_enabled());
}

#[test]
fn test_remote_is_enabled_by_default_and_last_flag_wins() {
    let cli = Cli::try_parse_from(["waypoint", "migrate"]).unwrap();
    let Commands::Migrate(args) = cli.command else {
        panic!("expected migrate");
    };
    assert!(args.remote_enabled());

    let cli = Cli::try_parse_from(["waypoint", "migrate", "--no-remote", "--remote"]).unwrap();
    let Commands::Migrate(args) = cli.command else {
        panic!("expected migrate");
    };
    assert!(args.remote_enabled());
}

#[test]
fn test_global_args_follow_the_subcommand() {
    let cli = Cli::try_parse_from([
        "waypoint",
        "status",
        "--json",
        "-d",
        "erp.duckdb",
        "-p",
        "project",
    ])
    .unwrap();
    assert_eq!(cli.global.database.as_deref(), Some("erp.duckdb"));
    assert_eq!(cli.global.project_dir, "project");
    assert!(matches!(cli.command, Commands::Status(StatusArgs { json: true })));
}

#[test]
fn test_resolve_requires_a_version() {
    assert!(Cli::try_parse_from(["waypoint", "resolve"]).is_err());
}

#[test]
fn test_resolve_accepts_step_document() {
    let cli = Cli::try_parse_from(["waypoint", "resolve", "1.2.0", "--file", "steps.yaml"]).unwrap();
    match cli.command {
        Commands::Resolve(args) => {
            assert_eq!(args.version, "1.2.0");
            assert_eq!(args.file.as_deref(), Some("steps.yaml"));
        }
        other => panic!("expected resolve, got {other:?}"),
    }
}
