use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What a reasoning call is for. Providers may be routed per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Root-cause hypothesis for an empty step result.
    StepDecision,
    /// Choosing a retry strategy among the available options.
    StrategySelection,
    /// Turning a failure pattern into an improvement suggestion.
    FailureAnalysis,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepDecision => "step_decision",
            Self::StrategySelection => "strategy_selection",
            Self::FailureAnalysis => "failure_analysis",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a reasoning conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author ("system", "user" or "assistant")
    pub role: String,

    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Errors a reasoning capability may raise
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReasoningError {
    /// Provider throttled the request
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Provider quota is used up; retrying the same provider will not help
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Provider-side failure
    #[error("Server error: {0}")]
    ServerError(String),

    /// Anything else, including bad responses
    #[error("Reasoning call failed: {0}")]
    Other(String),
}

impl ReasoningError {
    /// Returns true if the same provider may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit(_) | Self::ServerError(_))
    }
}

/// Port trait for the injected reasoning capability
///
/// Implementations return JSON text when `structured_output` is true. Several
/// providers may stand behind one implementation; the core never knows which
/// answered.
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    async fn call(
        &self,
        task: TaskKind,
        messages: &[ChatMessage],
        temperature: f32,
        structured_output: bool,
    ) -> Result<String, ReasoningError>;
}
