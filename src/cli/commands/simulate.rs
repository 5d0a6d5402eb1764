//! Offline research pipeline simulation.
//!
//! Every step gets a synthetic action producing plausible output, so the
//! retry, decision and logging machinery can be exercised without any
//! external service.

use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::Args;
use comfy_table::Cell;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::load_config;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{
    AttemptError, BatchConfig, RunSummary, StepInput, TokenUsage,
};
use crate::domain::ports::PipelineStore;
use crate::infrastructure::store::{InMemoryStore, JsonlStore};
use crate::services::batch::run_batched;
use crate::services::orchestrator::{Orchestrator, PipelineRun, PipelineStep};
use crate::services::step_runner::{StepAction, StepContext};
use crate::services::strategy_catalog::research_steps;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Research topic
    #[arg(long)]
    pub topic: String,

    /// Make a step's action always fail (repeatable)
    #[arg(long, value_name = "STEP")]
    pub fail: Vec<String>,

    /// Make a step's action return empty output (repeatable)
    #[arg(long, value_name = "STEP")]
    pub empty: Vec<String>,

    /// Override the pause between fan-out batches
    #[arg(long, value_name = "MS")]
    pub batch_delay_ms: Option<u64>,

    /// Persist the run log as JSON lines under this directory
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Normal,
    Fail,
    Empty,
}

/// Deterministic stand-in for a research step.
struct SyntheticAction {
    step: &'static str,
    behavior: Behavior,
    batch: BatchConfig,
}

impl SyntheticAction {
    fn topic(input: &StepInput) -> String {
        input
            .get("query")
            .or_else(|| input.get("topic"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn hits(topic: &str, count: usize, host: &str) -> Value {
        let hits: Vec<Value> = (1..=count)
            .map(|i| {
                json!({
                    "title": format!("{topic}: report {i}"),
                    "url": format!("https://{host}/{i}"),
                    "source": host,
                })
            })
            .collect();
        json!({ "kind": "search_results", "data": hits })
    }

    /// Fan out over `count` items; every item succeeds unless output is empty.
    async fn fan_out(&self, ctx: &StepContext, count: usize, target: Option<&str>) -> usize {
        let succeed = self.behavior == Behavior::Normal;
        let outcome = run_batched((0..count).collect(), &self.batch, ctx.cancellation(), |_| async move {
            let Some(target) = target else {
                return succeed;
            };
            let order = ctx.begin_attempt(target).await;
            if succeed {
                let tokens = TokenUsage {
                    input_tokens: 1_200,
                    output_tokens: 180,
                };
                ctx.finish_attempt(order, Some(tokens), None).await;
            } else {
                ctx.finish_attempt(order, None, Some(AttemptError::from_message("empty response body")))
                    .await;
            }
            succeed
        })
        .await;
        outcome.results.into_iter().filter(|ok| *ok).count()
    }

    fn rate(kind: &str, attempted: usize, succeeded: usize) -> Value {
        json!({ "kind": kind, "data": { "attempted": attempted, "succeeded": succeeded } })
    }
}

#[async_trait]
impl StepAction<Value> for SyntheticAction {
    async fn execute(&self, input: &StepInput, ctx: &StepContext) -> Result<Value> {
        if self.behavior == Behavior::Fail {
            bail!("synthetic failure in {}", self.step);
        }
        let empty = self.behavior == Behavior::Empty;
        let topic = Self::topic(input);

        let value = match self.step {
            research_steps::GENERATE_KEYWORDS => {
                let keywords: Vec<String> = if empty {
                    Vec::new()
                } else {
                    ["", " news", " timeline", " analysis", " background", " impact"]
                        .iter()
                        .map(|suffix| format!("{topic}{suffix}"))
                        .collect()
                };
                json!({ "kind": "keywords", "data": keywords })
            }
            research_steps::SEARCH_NEWS => {
                let source = input.get("source").and_then(Value::as_str).unwrap_or("news.example");
                Self::hits(&topic, if empty { 0 } else { 8 }, source)
            }
            research_steps::SEARCH_VIDEOS => {
                Self::hits(&topic, if empty { 0 } else { 5 }, "video.example")
            }
            research_steps::SCRAPE_ARTICLES => {
                let source = input.get("source").and_then(Value::as_str);
                Self::rate("scraped", 8, self.fan_out(ctx, 8, source).await)
            }
            research_steps::TRANSCRIBE_VIDEOS => {
                Self::rate("transcripts", 5, self.fan_out(ctx, 5, None).await)
            }
            research_steps::SUMMARIZE_ARTICLES => {
                let model = input
                    .get("implementation")
                    .and_then(Value::as_str)
                    .unwrap_or("summarize_primary_model")
                    .to_string();
                Self::rate("summaries", 8, self.fan_out(ctx, 8, Some(&model)).await)
            }
            research_steps::CLASSIFY_CONTENT => {
                json!({ "kind": "classified", "data": { "total": 13, "classified": if empty { 0 } else { 12 } } })
            }
            research_steps::ANALYZE_TOPIC => {
                let sections: Vec<String> = if empty {
                    Vec::new()
                } else {
                    ["Background", "Key actors", "Timeline", "Outlook"]
                        .iter()
                        .map(|s| format!("{s} of {topic}"))
                        .collect()
                };
                json!({ "kind": "analysis", "data": { "sections": sections, "word_count": if empty { 0 } else { 850 } } })
            }
            other => bail!("no synthetic action for step '{other}'"),
        };
        Ok(value)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SimulatedStep {
    pub step: String,
    pub status: String,
    pub quality: String,
    pub retries: u32,
    pub decision: Option<String>,
    pub issue: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct SimulateOutput {
    pub topic: String,
    pub steps: Vec<SimulatedStep>,
    pub suggestions: Vec<String>,
    pub summary: RunSummary,
}

impl SimulateOutput {
    fn from_run(topic: &str, run: &PipelineRun) -> Self {
        Self {
            topic: topic.to_string(),
            steps: run
                .results
                .iter()
                .map(|(step, result)| SimulatedStep {
                    step: step.clone(),
                    status: result.status.to_string(),
                    quality: result.evaluation.quality.to_string(),
                    retries: result.retry_count,
                    decision: result.decision.as_ref().map(|d| d.decision.to_string()),
                    issue: result.evaluation.issue.clone(),
                })
                .collect(),
            suggestions: run.suggestions.iter().map(|s| s.title.clone()).collect(),
            summary: run.summary.clone(),
        }
    }
}

impl CommandOutput for SimulateOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["step", "status", "quality", "retries", "decision", "issue"]);
        for step in &self.steps {
            table.add_row(vec![
                Cell::new(&step.step),
                Cell::new(&step.status),
                Cell::new(&step.quality),
                Cell::new(step.retries),
                Cell::new(step.decision.as_deref().unwrap_or("-")),
                Cell::new(truncate(step.issue.as_deref().unwrap_or("-"), 60)),
            ]);
        }

        let s = &self.summary;
        let mut lines = vec![
            format!("Run {} for \"{}\": {}", s.run_id, self.topic, s.status),
            table.to_string(),
            String::new(),
            format!(
                "Completed: {}  Failed: {}  Degraded: {}  Duration: {}ms  Log entries: {}",
                s.steps_completed, s.steps_failed, s.steps_degraded, s.total_duration_ms, s.entry_count
            ),
        ];
        if !s.failed_targets.is_empty() {
            lines.push(format!("Failed targets: {}", s.failed_targets.join(", ")));
        }
        for title in &self.suggestions {
            lines.push(format!("Suggestion: {title}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn check_steps(flag: &str, steps: &[String]) -> Result<HashSet<String>> {
    for step in steps {
        if !research_steps::ORDER.contains(&step.as_str()) {
            bail!(
                "--{flag} names unknown step '{step}'. Known steps: {}",
                research_steps::ORDER.join(", ")
            );
        }
    }
    Ok(steps.iter().cloned().collect())
}

pub async fn execute(args: SimulateArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(delay) = args.batch_delay_ms {
        config.batch.inter_batch_delay_ms = delay;
    }
    let failing = check_steps("fail", &args.fail)?;
    let emptied = check_steps("empty", &args.empty)?;

    let store: Arc<dyn PipelineStore> = match &args.store_dir {
        Some(dir) => Arc::new(JsonlStore::open(dir).await?),
        None => Arc::new(InMemoryStore::new()),
    };

    let mut orchestrator = Orchestrator::from_config(&config, None, store);
    for step in research_steps::ORDER {
        let behavior = if failing.contains(step) {
            Behavior::Fail
        } else if emptied.contains(step) {
            Behavior::Empty
        } else {
            Behavior::Normal
        };
        let action = Arc::new(SyntheticAction {
            step,
            behavior,
            batch: config.batch.clone(),
        });
        orchestrator = orchestrator.with_step(PipelineStep::new(step, action));
    }

    let run = orchestrator.run(&args.topic).await;
    output(&SimulateOutput::from_run(&args.topic, &run), json_mode);
    Ok(())
}
