//! Retry configuration and strategy engine inputs/outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::evaluation::StepEvaluation;

/// Input handed to a step action. Modifications from retry strategies are
/// merged key by key.
pub type StepInput = serde_json::Map<String, serde_json::Value>;

/// Named algorithm for modifying input or choosing an alternative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    BroaderQuery,
    AlternativeFunction,
    DifferentSource,
    RerunEarlierStep,
    FallbackData,
    Skip,
    AiSelect,
    None,
}

impl StrategyKind {
    /// All strategy kinds, in catalog order.
    pub const ALL: [Self; 8] = [
        Self::BroaderQuery,
        Self::AlternativeFunction,
        Self::DifferentSource,
        Self::RerunEarlierStep,
        Self::FallbackData,
        Self::Skip,
        Self::AiSelect,
        Self::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BroaderQuery => "broader_query",
            Self::AlternativeFunction => "alternative_function",
            Self::DifferentSource => "different_source",
            Self::RerunEarlierStep => "rerun_earlier_step",
            Self::FallbackData => "fallback_data",
            Self::Skip => "skip",
            Self::AiSelect => "ai_select",
            Self::None => "none",
        }
    }

    /// Terminal strategies never ask for another execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FallbackData | Self::Skip | Self::None)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| format!("unknown strategy: {s}"))
    }
}

/// What to do with a step's contribution when it cannot be retried further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackBehavior {
    /// Omit the step's contribution.
    #[default]
    Omit,
    /// Substitute a default or cached value.
    UseDefault,
    /// Keep whatever partial output was produced.
    UsePartial,
}

/// Per-step retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRetryConfig {
    pub strategy: StrategyKind,
    pub max_retries: u32,
    pub can_skip: bool,
    #[serde(default)]
    pub fallback_behavior: FallbackBehavior,
}

impl StepRetryConfig {
    pub fn new(strategy: StrategyKind, max_retries: u32, can_skip: bool) -> Self {
        Self {
            strategy,
            max_retries,
            can_skip,
            fallback_behavior: FallbackBehavior::Omit,
        }
    }

    pub fn with_fallback_behavior(mut self, behavior: FallbackBehavior) -> Self {
        self.fallback_behavior = behavior;
        self
    }
}

impl Default for StepRetryConfig {
    /// Configuration applied to step names the catalog does not know.
    fn default() -> Self {
        Self::new(StrategyKind::Skip, 1, true)
    }
}

/// Everything a strategy needs to decide on one retry. Built fresh per decision.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub step_name: String,
    pub topic: String,
    pub evaluation: StepEvaluation,
    /// Retries already performed for this step.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Evaluations recorded for earlier steps in the run, keyed by step name.
    pub previous_step_results: Option<BTreeMap<String, StepEvaluation>>,
}

impl RetryContext {
    pub fn new(
        step_name: impl Into<String>,
        topic: impl Into<String>,
        evaluation: StepEvaluation,
        retry_count: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            topic: topic.into(),
            evaluation,
            retry_count,
            max_retries,
            previous_step_results: None,
        }
    }

    pub fn with_previous_results(mut self, results: BTreeMap<String, StepEvaluation>) -> Self {
        self.previous_step_results = Some(results);
        self
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Strategy engine output. Consumed immediately by the decision policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryModification {
    pub should_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_input: Option<StepInput>,
    pub reason: String,
    pub strategy_name: StrategyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_implementation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_step: Option<String>,
}

impl RetryModification {
    pub fn retry(strategy: StrategyKind, reason: impl Into<String>, input: StepInput) -> Self {
        Self {
            should_retry: true,
            modified_input: Some(input),
            reason: reason.into(),
            strategy_name: strategy,
            alternative_implementation: None,
            rerun_step: None,
        }
    }

    pub fn stop(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            modified_input: None,
            reason: reason.into(),
            strategy_name: strategy,
            alternative_implementation: None,
            rerun_step: None,
        }
    }
}
