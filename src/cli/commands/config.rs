//! Configuration CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

use crate::cli::load_config;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Load and validate the configuration
    Validate,
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigShowOutput {
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config)
            .unwrap_or_else(|e| format!("<could not render configuration: {e}>"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigValidateOutput {
    pub valid: bool,
    pub source: String,
    pub step_overrides: usize,
    pub log_level: String,
    pub tracker_scope: String,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        [
            format!("Configuration is valid ({})", self.source),
            format!("Step overrides: {}", self.step_overrides),
            format!("Log level:      {}", self.log_level),
            format!("Tracker scope:  {}", self.tracker_scope),
        ]
        .join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path).context("Configuration is invalid")?;

    match args.command {
        ConfigCommands::Show => output(&ConfigShowOutput { config }, json_mode),
        ConfigCommands::Validate => {
            let out = ConfigValidateOutput {
                valid: true,
                source: config_path.map_or_else(
                    || "defaults, .pipewright/, PIPEWRIGHT_*".to_string(),
                    |p| p.display().to_string(),
                ),
                step_overrides: config.steps.len(),
                log_level: config.logging.level.clone(),
                tracker_scope: serde_json::to_value(config.tracker.scope)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
