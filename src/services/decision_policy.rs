//! Decision policy: one evaluation in, one decision out.
//!
//! A deterministic state machine over evaluate, strategy lookup and an
//! optional reasoning call. It never loops; the step runner owns the loop.

use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::retry_strategy::RetryStrategyEngine;
use super::structured_output::parse_structured;
use crate::domain::models::{
    AiDecision, Quality, RetryContext, RetryModification, StepEvaluation, StepInput,
    StepRetryConfig, StrategyKind,
};
use crate::domain::ports::{ChatMessage, ReasoningCapability, TaskKind};

/// Everything the policy looks at for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub step_name: &'a str,
    pub topic: &'a str,
    pub evaluation: &'a StepEvaluation,
    pub retry: &'a StepRetryConfig,
    /// Retries already performed for this step.
    pub retry_count: u32,
    pub previous_results: &'a BTreeMap<String, StepEvaluation>,
}

impl DecisionRequest<'_> {
    fn retries_remaining(&self) -> bool {
        self.retry_count < self.retry.max_retries
    }

    fn retry_context(&self) -> RetryContext {
        RetryContext::new(
            self.step_name,
            self.topic,
            self.evaluation.clone(),
            self.retry_count,
            self.retry.max_retries,
        )
        .with_previous_results(self.previous_results.clone())
    }
}

/// Root-cause hypothesis requested for an empty result on its first retry.
#[derive(Debug, Deserialize)]
struct EmptyResultDiagnosis {
    root_cause: String,
    suggestion: String,
    #[serde(default)]
    modified_query: Option<String>,
}

pub struct DecisionPolicy {
    engine: Arc<RetryStrategyEngine>,
    reasoning: Option<Arc<dyn ReasoningCapability>>,
    enrich_empty_results: bool,
    temperature: f32,
}

impl DecisionPolicy {
    pub fn new(engine: Arc<RetryStrategyEngine>) -> Self {
        Self {
            engine,
            reasoning: None,
            enrich_empty_results: true,
            temperature: 0.3,
        }
    }

    pub fn with_reasoning(mut self, reasoning: Arc<dyn ReasoningCapability>) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn with_enrichment(mut self, enabled: bool) -> Self {
        self.enrich_empty_results = enabled;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn engine(&self) -> &RetryStrategyEngine {
        &self.engine
    }

    /// Resolve one attempt.
    pub async fn decide(&self, request: &DecisionRequest<'_>) -> AiDecision {
        let evaluation = request.evaluation;
        match evaluation.quality {
            Quality::Good => AiDecision::proceed("output meets the quality bar"),
            Quality::Partial => AiDecision::proceed(format!(
                "accepting partial output: {}",
                evaluation.issue_or_default()
            )),
            Quality::Error | Quality::Empty if !request.retries_remaining() => {
                Self::resolve_exhausted(
                    request.step_name,
                    request.retry,
                    &format!(
                        "{} retries used ({})",
                        request.retry_count,
                        evaluation.issue_or_default()
                    ),
                )
            }
            Quality::Error | Quality::Empty => self.decide_with_strategy(request).await,
        }
    }

    async fn decide_with_strategy(&self, request: &DecisionRequest<'_>) -> AiDecision {
        let ctx = request.retry_context();
        let modification = self
            .engine
            .get_retry_strategy(request.retry.strategy, &ctx)
            .await;

        if modification.strategy_name == StrategyKind::FallbackData {
            return AiDecision::fallback(modification.reason);
        }
        if !modification.should_retry || modification.strategy_name == StrategyKind::Skip {
            return Self::resolve_exhausted(request.step_name, request.retry, &modification.reason);
        }

        let RetryModification {
            reason,
            modified_input,
            rerun_step,
            ..
        } = modification;
        let mut decision = AiDecision::retry(reason, modified_input).with_rerun(rerun_step);

        if request.evaluation.quality == Quality::Empty && request.retry_count == 0 {
            self.enrich(request, &mut decision).await;
        }
        decision
    }

    /// Best-effort root-cause enrichment. Failures leave the decision as is.
    async fn enrich(&self, request: &DecisionRequest<'_>, decision: &mut AiDecision) {
        if !self.enrich_empty_results {
            return;
        }
        let Some(reasoning) = &self.reasoning else {
            return;
        };

        let details = json!({
            "step": request.step_name,
            "topic": request.topic,
            "issue": request.evaluation.issue,
            "metrics": request.evaluation.metrics,
            "planned_retry": decision.reason,
            "planned_input": decision.modified_input,
        });
        let messages = [
            ChatMessage::system(
                "A research pipeline step returned no usable output. Reply with one JSON \
                 object: {\"root_cause\": <string>, \"suggestion\": <string>, \
                 \"modified_query\": <string, optional>}.",
            ),
            ChatMessage::user(details.to_string()),
        ];

        let raw = match reasoning
            .call(TaskKind::StepDecision, &messages, self.temperature, true)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                debug!(step = request.step_name, error = %e, "Empty-result enrichment skipped");
                return;
            }
        };
        let diagnosis: EmptyResultDiagnosis = match parse_structured(&raw) {
            Ok(d) => d,
            Err(e) => {
                debug!(step = request.step_name, error = %e, "Empty-result enrichment unparsable");
                return;
            }
        };

        let input = decision.modified_input.get_or_insert_with(StepInput::new);
        input.insert("ai_root_cause".to_string(), json!(diagnosis.root_cause));
        input.insert("ai_suggestion".to_string(), json!(diagnosis.suggestion));
        if let Some(query) = diagnosis.modified_query.filter(|q| !q.trim().is_empty()) {
            input.insert("query".to_string(), json!(query));
        }
        decision.reason = format!("{} (root cause: {})", decision.reason, diagnosis.root_cause);
    }

    /// Resolution once a step cannot be retried any further.
    pub fn resolve_exhausted(step_name: &str, retry: &StepRetryConfig, reason: &str) -> AiDecision {
        if retry.can_skip {
            AiDecision::skip(format!("{reason}; skipping '{step_name}'"))
        } else {
            AiDecision::continue_degraded(format!(
                "{reason}; '{step_name}' cannot be skipped, continuing with degraded output"
            ))
        }
    }
}
