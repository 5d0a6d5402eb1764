//! Step runner: the execute, evaluate, decide loop for one step.
//!
//! Nothing escapes [`StepRunner::run_step`]. Action errors, weak output,
//! strategy exhaustion and reasoning failures all end in a [`StepResult`]
//! whose status tells the caller what happened. Every attempt is logged to the
//! run's [`PipelineLog`] before the loop moves on.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decision_policy::{DecisionPolicy, DecisionRequest};
use super::pipeline_log::PipelineLog;
use crate::domain::models::{
    AiDecision, AttemptError, Decision, LogType, Quality, StepEvaluation, StepInput, StepResult,
    StepRetryConfig, StepStatus, StrategyKind, TokenUsage,
};

/// What a step action sees besides its input.
#[derive(Clone)]
pub struct StepContext {
    run_id: Uuid,
    step_name: String,
    cancel: CancellationToken,
    log: Arc<PipelineLog>,
}

impl StepContext {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Token that fires when the run is cancelled. Long fan-outs should
    /// pass it on.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the start of an external call (model, provider, source).
    pub async fn begin_attempt(&self, target: impl Into<String>) -> u32 {
        self.log.begin_attempt(&self.step_name, target).await
    }

    pub async fn finish_attempt(
        &self,
        order: u32,
        tokens: Option<TokenUsage>,
        error: Option<AttemptError>,
    ) {
        self.log
            .finish_attempt(&self.step_name, order, tokens, error)
            .await;
    }
}

/// An opaque async step operation. Retries and timeouts are the runner's job.
#[async_trait]
pub trait StepAction<T>: Send + Sync {
    async fn execute(&self, input: &StepInput, ctx: &StepContext) -> anyhow::Result<T>;
}

/// Adapter turning an async closure into a [`StepAction`].
pub struct FnAction<F>(F);

#[async_trait]
impl<T, F, Fut> StepAction<T> for FnAction<F>
where
    T: Send + 'static,
    F: Fn(StepInput, StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    async fn execute(&self, input: &StepInput, ctx: &StepContext) -> anyhow::Result<T> {
        (self.0)(input.clone(), ctx.clone()).await
    }
}

pub fn action_fn<T, F, Fut>(f: F) -> Arc<dyn StepAction<T>>
where
    T: Send + 'static,
    F: Fn(StepInput, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

pub type Evaluator<T> = Arc<dyn Fn(&T) -> StepEvaluation + Send + Sync>;

/// One step as handed to the runner.
pub struct StepConfig<T> {
    pub name: String,
    pub action: Arc<dyn StepAction<T>>,
    pub evaluator: Evaluator<T>,
    pub retry: StepRetryConfig,
    pub fallback: Option<Arc<dyn StepAction<T>>>,
    pub input: StepInput,
}

impl<T> StepConfig<T> {
    pub fn new(
        name: impl Into<String>,
        action: Arc<dyn StepAction<T>>,
        evaluator: impl Fn(&T) -> StepEvaluation + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            evaluator: Arc::new(evaluator),
            retry: StepRetryConfig::default(),
            fallback: None,
            input: StepInput::new(),
        }
    }

    pub fn with_retry(mut self, retry: StepRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn StepAction<T>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_input(mut self, input: StepInput) -> Self {
        self.input = input;
        self
    }
}

/// What an upstream re-run produced.
#[derive(Debug, Clone)]
pub struct RerunOutcome {
    pub evaluation: StepEvaluation,
    /// Merged into the downstream step's next input.
    pub input_update: StepInput,
}

/// Re-executes an upstream step once on behalf of a downstream retry.
#[async_trait]
pub trait UpstreamRerun: Send + Sync {
    /// Returns `None` if the step could not be re-run.
    async fn rerun(&self, step_name: &str, scope: &RunScope) -> Option<RerunOutcome>;
}

/// Per-run context shared by all steps of a run.
#[derive(Clone)]
pub struct RunScope {
    pub topic: String,
    pub previous_results: BTreeMap<String, StepEvaluation>,
    pub cancel: CancellationToken,
    pub rerunner: Option<Arc<dyn UpstreamRerun>>,
    log: Arc<PipelineLog>,
}

impl RunScope {
    pub fn new(topic: impl Into<String>, log: Arc<PipelineLog>) -> Self {
        Self {
            topic: topic.into(),
            previous_results: BTreeMap::new(),
            cancel: CancellationToken::new(),
            rerunner: None,
            log,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_previous_results(mut self, results: BTreeMap<String, StepEvaluation>) -> Self {
        self.previous_results = results;
        self
    }

    pub fn with_rerunner(mut self, rerunner: Arc<dyn UpstreamRerun>) -> Self {
        self.rerunner = Some(rerunner);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.log.run_id()
    }

    pub fn log(&self) -> &Arc<PipelineLog> {
        &self.log
    }

    pub fn context_for(&self, step_name: &str) -> StepContext {
        StepContext {
            run_id: self.run_id(),
            step_name: step_name.to_string(),
            cancel: self.cancel.clone(),
            log: self.log.clone(),
        }
    }
}

/// Mutable state of one `run_step` call.
struct Attempts<T> {
    name: String,
    retry_count: u32,
    evaluation: StepEvaluation,
    data: Option<T>,
}

pub struct StepRunner {
    policy: Arc<DecisionPolicy>,
}

impl StepRunner {
    pub fn new(policy: Arc<DecisionPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Run one step to resolution.
    pub async fn run_step<T>(&self, config: StepConfig<T>, scope: &RunScope) -> StepResult<T>
    where
        T: Serialize + Send + Sync,
    {
        let log = scope.log().clone();
        let max_retries = config.retry.max_retries;
        let mut input = config.input.clone();
        self.seed_source(&config, &mut input);
        let mut previous = scope.previous_results.clone();
        let mut state = Attempts {
            name: config.name.clone(),
            retry_count: 0,
            evaluation: StepEvaluation::new(Quality::Empty, None),
            data: None,
        };
        let name = state.name.clone();

        log.start_step(&name, &Value::Object(input.clone())).await;
        log.record(&name, LogType::Info, "starting").await;
        info!(run_id = %scope.run_id(), step = %name, max_retries, "Step started");

        loop {
            if scope.cancel.is_cancelled() {
                return Self::cancelled(state, &log).await;
            }

            let ctx = scope.context_for(&name);
            let outcome = tokio::select! {
                biased;
                () = scope.cancel.cancelled() => None,
                result = config.action.execute(&input, &ctx) => Some(result),
            };
            let Some(outcome) = outcome else {
                return Self::cancelled(state, &log).await;
            };
            if scope.cancel.is_cancelled() {
                return Self::cancelled(state, &log).await;
            }

            match outcome {
                Err(e) => {
                    let message = format!("{e:#}");
                    state.evaluation = StepEvaluation::error(message.clone());
                    log.record_with_data(
                        &name,
                        LogType::Error,
                        format!("attempt {} failed: {message}", state.retry_count + 1),
                        json!({ "retry_count": state.retry_count }),
                    )
                    .await;
                    debug!(step = %name, attempt = state.retry_count + 1, error = %message, "Step action failed");

                    if state.retry_count < max_retries {
                        state.retry_count += 1;
                        log.record(
                            &name,
                            LogType::Warning,
                            format!("retrying ({}/{max_retries})", state.retry_count),
                        )
                        .await;
                        continue;
                    }

                    let decision = DecisionPolicy::resolve_exhausted(
                        &name,
                        &config.retry,
                        &format!("action failed after {} retries", state.retry_count),
                    );
                    Self::log_decision(&log, &name, &decision).await;
                    return self.resolve_terminal(decision, state, &config.retry, &log).await;
                }
                Ok(data) => {
                    state.evaluation = (config.evaluator)(&data);
                    Self::log_evaluation(&log, &name, &state.evaluation).await;
                    state.data = Some(data);
                }
            }

            let request = DecisionRequest {
                step_name: &name,
                topic: &scope.topic,
                evaluation: &state.evaluation,
                retry: &config.retry,
                retry_count: state.retry_count,
                previous_results: &previous,
            };
            let decision = tokio::select! {
                biased;
                () = scope.cancel.cancelled() => None,
                decision = self.policy.decide(&request) => Some(decision),
            };
            let Some(decision) = decision else {
                return Self::cancelled(state, &log).await;
            };
            Self::log_decision(&log, &name, &decision).await;

            match decision.decision {
                Decision::Continue | Decision::Skip => {
                    return self.resolve_terminal(decision, state, &config.retry, &log).await;
                }
                Decision::Fallback => {
                    return self
                        .run_fallback(&config, decision, state, scope, &input)
                        .await;
                }
                Decision::Retry => {}
            }

            // The runner owns the ceiling, whatever the policy said.
            if state.retry_count + 1 > max_retries {
                let decision = DecisionPolicy::resolve_exhausted(
                    &name,
                    &config.retry,
                    &format!("retry ceiling of {max_retries} reached"),
                );
                Self::log_decision(&log, &name, &decision).await;
                return self.resolve_terminal(decision, state, &config.retry, &log).await;
            }

            if let (Some(upstream), Some(rerunner)) = (&decision.rerun_step, &scope.rerunner) {
                log.record(&name, LogType::Info, format!("re-running upstream step '{upstream}'"))
                    .await;
                match rerunner.rerun(upstream, scope).await {
                    Some(outcome) => {
                        log.record_with_data(
                            &name,
                            LogType::Info,
                            format!(
                                "upstream '{upstream}' re-ran with {} quality",
                                outcome.evaluation.quality
                            ),
                            json!(outcome.evaluation),
                        )
                        .await;
                        previous.insert(upstream.clone(), outcome.evaluation);
                        input.extend(outcome.input_update);
                    }
                    None => {
                        log.record(
                            &name,
                            LogType::Warning,
                            format!("upstream '{upstream}' could not be re-run"),
                        )
                        .await;
                    }
                }
            }

            if let Some(modified) = &decision.modified_input {
                for (key, value) in modified {
                    input.insert(key.clone(), value.clone());
                }
            }
            state.retry_count += 1;
            log.record_with_data(
                &name,
                LogType::Warning,
                format!("retrying ({}/{max_retries}): {}", state.retry_count, decision.reason),
                Value::Object(input.clone()),
            )
            .await;
        }
    }

    /// A step that rotates through sources starts on the first one; retry
    /// `n` then moves to source `n`.
    fn seed_source<T>(&self, config: &StepConfig<T>, input: &mut StepInput) {
        if !matches!(
            config.retry.strategy,
            StrategyKind::DifferentSource | StrategyKind::AiSelect
        ) || input.contains_key("source")
        {
            return;
        }
        if let Some(first) = self.policy.engine().catalog().sources_for(&config.name).first() {
            input.insert("source".to_string(), json!(first));
        }
    }

    async fn run_fallback<T>(
        &self,
        config: &StepConfig<T>,
        decision: AiDecision,
        mut state: Attempts<T>,
        scope: &RunScope,
        input: &StepInput,
    ) -> StepResult<T>
    where
        T: Serialize + Send + Sync,
    {
        let log = scope.log().clone();
        let name = state.name.clone();
        let Some(fallback) = &config.fallback else {
            let decision = DecisionPolicy::resolve_exhausted(
                &name,
                &config.retry,
                &format!("{}; no fallback action configured", decision.reason),
            );
            Self::log_decision(&log, &name, &decision).await;
            return self.resolve_terminal(decision, state, &config.retry, &log).await;
        };

        log.record(&name, LogType::Info, "running fallback action").await;
        let ctx = scope.context_for(&name);
        let outcome = tokio::select! {
            biased;
            () = scope.cancel.cancelled() => None,
            result = fallback.execute(input, &ctx) => Some(result),
        };
        let Some(outcome) = outcome else {
            return Self::cancelled(state, &log).await;
        };

        match outcome {
            Ok(data) => {
                state.evaluation = StepEvaluation::partial(format!(
                    "{name}: fallback data used ({})",
                    state.evaluation.issue_or_default()
                ));
                log.record(&name, LogType::Success, "fallback action produced data")
                    .await;
                log.finish_step(&name, StepStatus::FellBack, serde_json::to_value(&data).ok().as_ref())
                    .await;
                StepResult {
                    success: true,
                    data: Some(data),
                    evaluation: state.evaluation,
                    decision: Some(decision),
                    retry_count: state.retry_count,
                    status: StepStatus::FellBack,
                }
            }
            Err(e) => {
                log.record(&name, LogType::Error, format!("fallback action failed: {e:#}"))
                    .await;
                let decision = DecisionPolicy::resolve_exhausted(
                    &name,
                    &config.retry,
                    &format!("fallback failed: {e:#}"),
                );
                Self::log_decision(&log, &name, &decision).await;
                self.resolve_terminal(decision, state, &config.retry, &log).await
            }
        }
    }

    /// Finish on a `continue` or `skip` decision.
    async fn resolve_terminal<T>(
        &self,
        decision: AiDecision,
        state: Attempts<T>,
        retry: &StepRetryConfig,
        log: &PipelineLog,
    ) -> StepResult<T>
    where
        T: Serialize + Send + Sync,
    {
        let name = state.name;
        let (status, success) = match decision.decision {
            Decision::Skip => (StepStatus::Skipped, false),
            _ if decision.continued_degraded => (StepStatus::ContinuedDegraded, true),
            _ => (StepStatus::Success, true),
        };

        if status == StepStatus::ContinuedDegraded {
            log.record(
                &name,
                LogType::Warning,
                format!("continuing with degraded output ({} quality)", state.evaluation.quality),
            )
            .await;
            warn!(step = %name, quality = %state.evaluation.quality, "Step continued degraded");
        }

        let output = state
            .data
            .as_ref()
            .and_then(|d| serde_json::to_value(d).ok());
        log.finish_step(&name, status, output.as_ref()).await;
        info!(
            step = %name,
            status = %status,
            retry_count = state.retry_count,
            max_retries = retry.max_retries,
            "Step resolved"
        );

        StepResult {
            success,
            data: state.data,
            evaluation: state.evaluation,
            decision: Some(decision),
            retry_count: state.retry_count,
            status,
        }
    }

    async fn cancelled<T>(state: Attempts<T>, log: &PipelineLog) -> StepResult<T> {
        log.record(&state.name, LogType::Warning, "cancelled").await;
        log.finish_step(&state.name, StepStatus::Cancelled, None).await;
        info!(step = %state.name, retry_count = state.retry_count, "Step cancelled");
        StepResult {
            success: false,
            data: state.data,
            evaluation: state.evaluation,
            decision: None,
            retry_count: state.retry_count,
            status: StepStatus::Cancelled,
        }
    }

    async fn log_evaluation(log: &PipelineLog, name: &str, evaluation: &StepEvaluation) {
        let (log_type, message) = match evaluation.quality {
            Quality::Good => (LogType::Success, "output is good".to_string()),
            Quality::Partial => (
                LogType::Warning,
                format!("partial output: {}", evaluation.issue_or_default()),
            ),
            Quality::Empty => (
                LogType::Warning,
                format!("empty output: {}", evaluation.issue_or_default()),
            ),
            Quality::Error => (
                LogType::Error,
                format!("invalid output: {}", evaluation.issue_or_default()),
            ),
        };
        log.record_with_data(name, log_type, message, json!(evaluation))
            .await;
    }

    async fn log_decision(log: &PipelineLog, name: &str, decision: &AiDecision) {
        log.record_with_data(
            name,
            LogType::Decision,
            format!("{}: {}", decision.decision, decision.reason),
            json!(decision),
        )
        .await;
        debug!(step = name, decision = %decision.decision, "Decision recorded");
    }
}
