//! Pipeline orchestrator.
//!
//! Runs an ordered list of JSON-valued steps strictly sequentially through the
//! [`StepRunner`], feeding each step the topic and the outputs of the steps
//! before it. Every run owns its own [`PipelineLog`] and cancellation token.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::decision_policy::DecisionPolicy;
use super::evaluators::evaluate_value;
use super::improvement_tracker::ImprovementTracker;
use super::pipeline_log::{PipelineLog, DEFAULT_PREVIEW_LEN};
use super::retry_strategy::RetryStrategyEngine;
use super::step_runner::{
    Evaluator, RerunOutcome, RunScope, StepAction, StepConfig, StepRunner, UpstreamRerun,
};
use super::strategy_catalog::StrategyCatalog;
use crate::domain::models::{
    Config, FallbackBehavior, ImprovementSuggestion, LogType, RunStatus, RunSummary, StepEvaluation,
    StepInput, StepLog, StepOutcome, StepResult, StepStatus, TrackerConfig, TrackerScope,
};
use crate::domain::ports::{NullStore, PipelineStore, ReasoningCapability};

/// One registered pipeline step with JSON input and output.
#[derive(Clone)]
pub struct PipelineStep {
    pub name: String,
    pub action: Arc<dyn StepAction<Value>>,
    pub evaluator: Evaluator<Value>,
    pub fallback: Option<Arc<dyn StepAction<Value>>>,
    /// Handed downstream when the step is skipped with `use_default`.
    pub default_output: Option<Value>,
    pub input: StepInput,
}

impl PipelineStep {
    /// A step evaluated by the built-in evaluator registered for `name`.
    pub fn new(name: impl Into<String>, action: Arc<dyn StepAction<Value>>) -> Self {
        let name = name.into();
        let evaluated_as = name.clone();
        Self {
            name,
            action,
            evaluator: Arc::new(move |value: &Value| evaluate_value(&evaluated_as, value)),
            fallback: None,
            default_output: None,
            input: StepInput::new(),
        }
    }

    pub fn with_evaluator(
        mut self,
        evaluator: impl Fn(&Value) -> StepEvaluation + Send + Sync + 'static,
    ) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn StepAction<Value>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_default_output(mut self, output: Value) -> Self {
        self.default_output = Some(output);
        self
    }

    pub fn with_input(mut self, input: StepInput) -> Self {
        self.input = input;
        self
    }
}

/// Everything a finished run produced.
#[derive(Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Step results in execution order.
    pub results: Vec<(String, StepResult<Value>)>,
    pub suggestions: Vec<ImprovementSuggestion>,
    pub summary: RunSummary,
    #[serde(skip)]
    pub log: Arc<PipelineLog>,
}

impl PipelineRun {
    pub fn result(&self, step_name: &str) -> Option<&StepResult<Value>> {
        self.results
            .iter()
            .find(|(name, _)| name == step_name)
            .map(|(_, result)| result)
    }
}

struct ActiveRun {
    cancel: CancellationToken,
    log: Arc<PipelineLog>,
}

enum TrackerMode {
    Shared(Arc<ImprovementTracker>),
    PerRun {
        config: TrackerConfig,
        reasoning: Option<Arc<dyn ReasoningCapability>>,
    },
}

pub struct Orchestrator {
    steps: Arc<Vec<PipelineStep>>,
    runner: Arc<StepRunner>,
    store: Arc<dyn PipelineStore>,
    tracker: TrackerMode,
    preview_len: usize,
    active_runs: RwLock<HashMap<Uuid, ActiveRun>>,
}

impl Orchestrator {
    pub fn new(runner: Arc<StepRunner>) -> Self {
        Self {
            steps: Arc::new(Vec::new()),
            runner,
            store: Arc::new(NullStore::new()),
            tracker: TrackerMode::Shared(Arc::new(ImprovementTracker::default())),
            preview_len: DEFAULT_PREVIEW_LEN,
            active_runs: RwLock::new(HashMap::new()),
        }
    }

    /// Wire engine, policy, runner and tracker from configuration.
    pub fn from_config(
        config: &Config,
        reasoning: Option<Arc<dyn ReasoningCapability>>,
        store: Arc<dyn PipelineStore>,
    ) -> Self {
        let temperature = config.reasoning.temperature;
        let engine = Arc::new(RetryStrategyEngine::with_reasoning(
            StrategyCatalog::from_config(config),
            reasoning.clone(),
            temperature,
        ));
        let mut policy = DecisionPolicy::new(engine)
            .with_enrichment(config.reasoning.enrich_empty_results)
            .with_temperature(temperature);
        if let Some(reasoning) = &reasoning {
            policy = policy.with_reasoning(reasoning.clone());
        }
        let runner = Arc::new(StepRunner::new(Arc::new(policy)));

        let orchestrator = Self::new(runner)
            .with_store(store.clone())
            .with_preview_len(config.runner.preview_len);
        match config.tracker.scope {
            TrackerScope::PerRun => orchestrator.with_per_run_tracker(config.tracker.clone(), reasoning),
            TrackerScope::Shared => {
                let mut tracker = ImprovementTracker::new(&config.tracker)
                    .with_store(store)
                    .with_temperature(temperature);
                if let Some(reasoning) = reasoning {
                    tracker = tracker.with_reasoning(reasoning);
                }
                orchestrator.with_tracker(Arc::new(tracker))
            }
        }
    }

    pub fn with_store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = store;
        self
    }

    /// Share one tracker across every run of this orchestrator.
    pub fn with_tracker(mut self, tracker: Arc<ImprovementTracker>) -> Self {
        self.tracker = TrackerMode::Shared(tracker);
        self
    }

    /// Give each run a fresh tracker.
    pub fn with_per_run_tracker(
        mut self,
        config: TrackerConfig,
        reasoning: Option<Arc<dyn ReasoningCapability>>,
    ) -> Self {
        self.tracker = TrackerMode::PerRun { config, reasoning };
        self
    }

    pub fn with_preview_len(mut self, preview_len: usize) -> Self {
        self.preview_len = preview_len;
        self
    }

    pub fn with_step(mut self, step: PipelineStep) -> Self {
        Arc::make_mut(&mut self.steps).push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// The shared tracker, if the orchestrator uses one.
    pub fn shared_tracker(&self) -> Option<&Arc<ImprovementTracker>> {
        match &self.tracker {
            TrackerMode::Shared(tracker) => Some(tracker),
            TrackerMode::PerRun { .. } => None,
        }
    }

    pub async fn active_runs(&self) -> Vec<Uuid> {
        self.active_runs.read().await.keys().copied().collect()
    }

    /// Cancel an in-flight run. Returns whether the run was active.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        let Some(active) = self.active_runs.write().await.remove(&run_id) else {
            return false;
        };
        active.cancel.cancel();
        active.log.mark_cancelled().await;
        info!(run_id = %run_id, "Run cancelled");
        true
    }

    fn tracker_for_run(&self) -> Arc<ImprovementTracker> {
        match &self.tracker {
            TrackerMode::Shared(tracker) => tracker.clone(),
            TrackerMode::PerRun { config, reasoning } => {
                let mut tracker = ImprovementTracker::new(config).with_store(self.store.clone());
                if let Some(reasoning) = reasoning {
                    tracker = tracker.with_reasoning(reasoning.clone());
                }
                Arc::new(tracker)
            }
        }
    }

    /// Run every registered step against `topic`.
    pub async fn run(&self, topic: &str) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let log = Arc::new(
            PipelineLog::new(run_id, self.store.clone()).with_preview_len(self.preview_len),
        );
        let cancel = CancellationToken::new();
        self.active_runs.write().await.insert(
            run_id,
            ActiveRun {
                cancel: cancel.clone(),
                log: log.clone(),
            },
        );
        log.set_status(RunStatus::Running).await;
        info!(run_id = %run_id, topic, steps = self.steps.len(), "Run started");

        let tracker = self.tracker_for_run();
        let outputs = Arc::new(RwLock::new(BTreeMap::<String, Value>::new()));
        let refreshed = Arc::new(RwLock::new(BTreeMap::new()));
        let rerunner: Arc<dyn UpstreamRerun> = Arc::new(StepRerunner {
            steps: self.steps.clone(),
            outputs: outputs.clone(),
            refreshed: refreshed.clone(),
        });
        let catalog = self.runner.policy().engine().catalog();

        let mut evaluations = BTreeMap::new();
        let mut results = Vec::with_capacity(self.steps.len());
        let mut suggestions = Vec::new();

        for step in self.steps.iter() {
            if cancel.is_cancelled() {
                break;
            }
            let retry = catalog.config_for(&step.name);
            let input = build_input(topic, &*outputs.read().await, &step.input);
            let scope = RunScope::new(topic, log.clone())
                .with_cancel(cancel.clone())
                .with_previous_results(evaluations.clone())
                .with_rerunner(rerunner.clone());
            let config = StepConfig {
                name: step.name.clone(),
                action: step.action.clone(),
                evaluator: step.evaluator.clone(),
                retry: retry.clone(),
                fallback: step.fallback.clone(),
                input,
            };

            let result = self.runner.run_step(config, &scope).await;
            apply_refreshed(&mut *refreshed.write().await, &mut evaluations, &mut results);
            if result.status == StepStatus::Cancelled {
                results.push((step.name.clone(), result));
                break;
            }

            evaluations.insert(step.name.clone(), result.evaluation.clone());
            let downstream = match result.status {
                StepStatus::Skipped => match retry.fallback_behavior {
                    FallbackBehavior::Omit => None,
                    FallbackBehavior::UsePartial => result.data.clone(),
                    FallbackBehavior::UseDefault => step.default_output.clone(),
                },
                _ => result.data.clone(),
            };
            if let Some(value) = downstream {
                outputs.write().await.insert(step.name.clone(), value);
            }

            let outcome = if result.status == StepStatus::Success {
                StepOutcome::Success
            } else {
                StepOutcome::failure(result.evaluation.issue_or_default())
            };
            let recent: Vec<StepLog> = log.recent_entries(&step.name, usize::MAX).await;
            if let Some(suggestion) = tracker.record_outcome(&step.name, outcome, &recent).await {
                log.record_with_data(
                    &step.name,
                    LogType::Info,
                    format!("improvement suggested: {}", suggestion.title),
                    serde_json::json!({ "suggestion_id": suggestion.id }),
                )
                .await;
                suggestions.push(suggestion);
            }
            results.push((step.name.clone(), result));
        }

        self.active_runs.write().await.remove(&run_id);
        let status = if cancel.is_cancelled() || log.is_cancelled().await {
            RunStatus::Cancelled
        } else if results.iter().any(|(_, r)| r.is_degraded())
            || !results.iter().any(|(_, r)| r.status.is_completed())
        {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let status = log.set_status(status).await;
        let summary = log.summary().await;
        if status == RunStatus::Failed {
            warn!(run_id = %run_id, steps_failed = summary.steps_failed, "Run failed");
        } else {
            info!(run_id = %run_id, status = %status, duration_ms = summary.total_duration_ms, "Run finished");
        }

        PipelineRun {
            run_id,
            status,
            results,
            suggestions,
            summary,
            log,
        }
    }
}

/// Step input: topic, then upstream outputs by step name, then static input.
fn build_input(topic: &str, outputs: &BTreeMap<String, Value>, static_input: &StepInput) -> StepInput {
    let mut input = Map::new();
    input.insert("topic".to_string(), Value::String(topic.to_string()));
    for (name, value) in outputs {
        input.insert(name.clone(), value.clone());
    }
    for (key, value) in static_input {
        input.insert(key.clone(), value.clone());
    }
    input
}

/// Usable re-run results not yet folded into the run's results.
type Refreshed = BTreeMap<String, (Value, StepEvaluation)>;

/// A re-run that produced usable output replaces the step's earlier result,
/// so later steps and the returned run see the same data.
fn apply_refreshed(
    refreshed: &mut Refreshed,
    evaluations: &mut BTreeMap<String, StepEvaluation>,
    results: &mut [(String, StepResult<Value>)],
) {
    for (name, (value, evaluation)) in std::mem::take(refreshed) {
        evaluations.insert(name.clone(), evaluation.clone());
        if let Some((_, earlier)) = results.iter_mut().find(|(n, _)| *n == name) {
            earlier.success = true;
            earlier.status = StepStatus::Success;
            earlier.data = Some(value);
            earlier.evaluation = evaluation;
        }
    }
}

/// Re-runs an upstream step once, for `rerun_earlier_step` retries.
struct StepRerunner {
    steps: Arc<Vec<PipelineStep>>,
    outputs: Arc<RwLock<BTreeMap<String, Value>>>,
    refreshed: Arc<RwLock<Refreshed>>,
}

#[async_trait]
impl UpstreamRerun for StepRerunner {
    async fn rerun(&self, step_name: &str, scope: &RunScope) -> Option<RerunOutcome> {
        let position = self.steps.iter().position(|s| s.name == step_name)?;
        let step = &self.steps[position];
        let upstream: BTreeMap<String, Value> = {
            let outputs = self.outputs.read().await;
            self.steps[..position]
                .iter()
                .filter_map(|s| outputs.get(&s.name).map(|v| (s.name.clone(), v.clone())))
                .collect()
        };
        let input = build_input(&scope.topic, &upstream, &step.input);
        let ctx = scope.context_for(step_name);
        let log = scope.log();
        let earlier = log.step(step_name).await;
        log.start_step(step_name, &Value::Object(input.clone())).await;

        let outcome = tokio::select! {
            biased;
            () = scope.cancel.cancelled() => None,
            result = step.action.execute(&input, &ctx) => Some(result),
        };
        let Some(outcome) = outcome else {
            log.finish_step(step_name, StepStatus::Cancelled, None).await;
            return None;
        };
        let evaluation = match outcome {
            Ok(value) => {
                let evaluation = (step.evaluator)(&value);
                log.record_with_data(
                    step_name,
                    LogType::Info,
                    format!("re-run produced {} output", evaluation.quality),
                    serde_json::json!(evaluation),
                )
                .await;
                if evaluation.quality.is_usable() {
                    log.finish_step(step_name, StepStatus::Success, Some(&value)).await;
                    self.outputs
                        .write()
                        .await
                        .insert(step_name.to_string(), value.clone());
                    self.refreshed
                        .write()
                        .await
                        .insert(step_name.to_string(), (value.clone(), evaluation.clone()));
                    let mut input_update = StepInput::new();
                    input_update.insert(step_name.to_string(), value);
                    return Some(RerunOutcome {
                        evaluation,
                        input_update,
                    });
                }
                evaluation
            }
            Err(e) => {
                log.record(step_name, LogType::Error, format!("re-run failed: {e:#}"))
                    .await;
                StepEvaluation::error(format!("{e:#}"))
            }
        };

        // Unusable re-runs leave the earlier verdict in place.
        match earlier {
            Some(record) => {
                log.finish_step(step_name, record.status, record.output.as_ref())
                    .await;
            }
            None => log.finish_step(step_name, StepStatus::Failed, None).await,
        }
        Some(RerunOutcome {
            evaluation,
            input_update: StepInput::new(),
        })
    }
}
