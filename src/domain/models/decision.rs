//! Decisions and terminal step results.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::evaluation::StepEvaluation;
use super::retry::StepInput;

/// Resolved action for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Retry,
    Skip,
    Fallback,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision policy's answer for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDecision {
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_input: Option<StepInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_step: Option<String>,
    /// Set when a load-bearing step ran out of retries and the pipeline
    /// proceeds with degraded output instead of omitting it.
    #[serde(default)]
    pub continued_degraded: bool,
}

impl AiDecision {
    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Continue,
            reason: reason.into(),
            modified_input: None,
            rerun_step: None,
            continued_degraded: false,
        }
    }

    pub fn continue_degraded(reason: impl Into<String>) -> Self {
        Self {
            continued_degraded: true,
            ..Self::proceed(reason)
        }
    }

    pub fn retry(reason: impl Into<String>, modified_input: Option<StepInput>) -> Self {
        Self {
            decision: Decision::Retry,
            reason: reason.into(),
            modified_input,
            rerun_step: None,
            continued_degraded: false,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Skip,
            ..Self::proceed(reason)
        }
    }

    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Fallback,
            ..Self::proceed(reason)
        }
    }

    pub fn with_rerun(mut self, step: Option<String>) -> Self {
        self.rerun_step = step;
        self
    }
}

/// How a step resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    /// Retries exhausted on a step that cannot be skipped; output kept as-is.
    ContinuedDegraded,
    /// Resolved by running the configured fallback action.
    FellBack,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::ContinuedDegraded => "continued_degraded",
            Self::FellBack => "fell_back",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Whether the step counts as completed in run summaries.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Success | Self::FellBack)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal value returned to the caller once a step resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub evaluation: StepEvaluation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<AiDecision>,
    pub retry_count: u32,
    pub status: StepStatus,
}

impl<T> StepResult<T> {
    pub fn is_degraded(&self) -> bool {
        self.status == StepStatus::ContinuedDegraded
    }

    /// Convert the payload, keeping the verdict.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StepResult<U> {
        StepResult {
            success: self.success,
            data: self.data.map(f),
            evaluation: self.evaluation,
            decision: self.decision,
            retry_count: self.retry_count,
            status: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_degraded_is_named() {
        let d = AiDecision::continue_degraded("retries exhausted");
        assert_eq!(d.decision, Decision::Continue);
        assert!(d.continued_degraded);
        assert!(!AiDecision::proceed("fine").continued_degraded);
    }

    #[test]
    fn test_status_flags() {
        assert!(StepStatus::FellBack.is_completed());
        assert!(!StepStatus::ContinuedDegraded.is_completed());
        assert!(StepStatus::Cancelled.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn test_decision_serialization() {
        let d = AiDecision::skip("nothing found");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["decision"], "skip");
        assert_eq!(json["continued_degraded"], false);
    }
}
