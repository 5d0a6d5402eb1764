//! Pipewright CLI entry point.

use clap::Parser;

use pipewright::cli::{self, Cli, Commands};
use pipewright::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // A broken config is reported by the command itself; log with defaults meanwhile.
    let log_config = cli::load_config(config_path)
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Config(args) => cli::commands::config::execute(args, config_path, cli.json).await,
        Commands::Strategies(args) => {
            cli::commands::strategies::execute(args, config_path, cli.json).await
        }
        Commands::Simulate(args) => {
            cli::commands::simulate::execute(args, config_path, cli.json).await
        }
    };

    if let Err(err) = result {
        cli::handle_error(err, cli.json);
    }
}
