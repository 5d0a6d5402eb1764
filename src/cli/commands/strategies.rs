//! Retry strategy listing.

use anyhow::{bail, Result};
use clap::Args;
use comfy_table::Cell;
use std::path::Path;

use crate::cli::load_config;
use crate::cli::output::{join_or_dash, list_table, output, CommandOutput};
use crate::services::strategy_catalog::{research_steps, StrategyCatalog};

#[derive(Args, Debug)]
pub struct StrategiesArgs {
    /// Show a single step
    #[arg(long)]
    pub step: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct StrategyRow {
    pub step: String,
    pub strategy: String,
    pub max_retries: u32,
    pub can_skip: bool,
    pub fallback_behavior: String,
    pub alternatives: Vec<String>,
    pub sources: Vec<String>,
    pub upstream: Vec<String>,
}

impl StrategyRow {
    fn from_catalog(catalog: &StrategyCatalog, step: &str) -> Self {
        let config = catalog.config_for(step);
        Self {
            step: step.to_string(),
            strategy: config.strategy.to_string(),
            max_retries: config.max_retries,
            can_skip: config.can_skip,
            fallback_behavior: serde_json::to_value(config.fallback_behavior)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            alternatives: catalog.alternatives_for(step).to_vec(),
            sources: catalog.sources_for(step).to_vec(),
            upstream: catalog.graph().upstream_of(step).to_vec(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct StrategyListOutput {
    pub steps: Vec<StrategyRow>,
}

impl CommandOutput for StrategyListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&[
            "step",
            "strategy",
            "retries",
            "skip",
            "when skipped",
            "alternatives",
            "sources",
            "upstream",
        ]);
        for row in &self.steps {
            table.add_row(vec![
                Cell::new(&row.step),
                Cell::new(&row.strategy),
                Cell::new(row.max_retries),
                Cell::new(if row.can_skip { "yes" } else { "no" }),
                Cell::new(&row.fallback_behavior),
                Cell::new(join_or_dash(&row.alternatives)),
                Cell::new(join_or_dash(&row.sources)),
                Cell::new(join_or_dash(&row.upstream)),
            ]);
        }
        format!("{} step(s):\n{table}", self.steps.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Research steps in pipeline order, then any extra configured steps by name.
fn ordered_steps(catalog: &StrategyCatalog) -> Vec<String> {
    let mut steps: Vec<String> = research_steps::ORDER.iter().map(ToString::to_string).collect();
    for name in catalog.step_names() {
        if !steps.contains(&name) {
            steps.push(name);
        }
    }
    steps
}

pub async fn execute(args: StrategiesArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let catalog = StrategyCatalog::from_config(&config);

    let steps = match args.step {
        Some(step) if catalog.is_registered(&step) => vec![step],
        Some(step) => bail!("Unknown step '{step}'. Known steps: {}", ordered_steps(&catalog).join(", ")),
        None => ordered_steps(&catalog),
    };

    let out = StrategyListOutput {
        steps: steps
            .iter()
            .map(|s| StrategyRow::from_catalog(&catalog, s))
            .collect(),
    };
    output(&out, json_mode);
    Ok(())
}
