//! CLI parsing tests for the pipewright binary surface.

use clap::Parser;
use std::path::Path;

use pipewright::cli::commands::config::ConfigCommands;
use pipewright::cli::{Cli, Commands};

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "pipewright",
        "strategies",
        "--step",
        "scrape_articles",
        "--json",
        "--config",
        "/tmp/pipewright.yaml",
    ])
    .unwrap();

    assert!(cli.json);
    assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/pipewright.yaml")));
    let Commands::Strategies(args) = cli.command else {
        panic!("expected strategies");
    };
    assert_eq!(args.step.as_deref(), Some("scrape_articles"));
}

#[test]
fn test_config_subcommands() {
    let cli = Cli::try_parse_from(["pipewright", "config", "validate"]).unwrap();
    assert!(!cli.json);
    assert!(matches!(
        cli.command,
        Commands::Config(args) if matches!(args.command, ConfigCommands::Validate)
    ));

    let cli = Cli::try_parse_from(["pipewright", "-j", "config", "show"]).unwrap();
    assert!(cli.json);
    assert!(matches!(
        cli.command,
        Commands::Config(args) if matches!(args.command, ConfigCommands::Show)
    ));
}

#[test]
fn test_simulate_options() {
    let cli = Cli::try_parse_from([
        "pipewright",
        "simulate",
        "--topic",
        "Sudan Civil War 2024",
        "--batch-delay-ms",
        "0",
        "--store-dir",
        "runs",
    ])
    .unwrap();

    let Commands::Simulate(args) = cli.command else {
        panic!("expected simulate");
    };
    assert_eq!(args.batch_delay_ms, Some(0));
    assert_eq!(args.store_dir.as_deref(), Some(Path::new("runs")));
    assert!(args.fail.is_empty());
}

#[test]
fn test_simulate_requires_topic() {
    assert!(Cli::try_parse_from(["pipewright", "simulate"]).is_err());
}

#[test]
fn test_config_path_from_environment() {
    let cli = temp_env::with_var("PIPEWRIGHT_CONFIG", Some("env.yaml"), || {
        Cli::try_parse_from(["pipewright", "strategies"]).unwrap()
    });
    assert_eq!(cli.config.as_deref(), Some(Path::new("env.yaml")));
}
