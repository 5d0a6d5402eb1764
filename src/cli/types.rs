//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{config::ConfigArgs, simulate::SimulateArgs, strategies::StrategiesArgs};

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(about = "Pipewright - research pipeline orchestration core", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .pipewright/config.yaml and local.yaml)
    #[arg(short, long, global = true, env = "PIPEWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and validate configuration
    Config(ConfigArgs),

    /// List retry strategies per step
    Strategies(StrategiesArgs),

    /// Run the research pipeline offline with synthetic step actions
    Simulate(SimulateArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_with_repeated_flags() {
        let cli = Cli::try_parse_from([
            "pipewright",
            "--json",
            "simulate",
            "--topic",
            "Sudan Civil War 2024",
            "--fail",
            "scrape_articles",
            "--empty",
            "search_news",
            "--empty",
            "search_videos",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.topic, "Sudan Civil War 2024");
        assert_eq!(args.fail, ["scrape_articles"]);
        assert_eq!(args.empty, ["search_news", "search_videos"]);
    }
}
