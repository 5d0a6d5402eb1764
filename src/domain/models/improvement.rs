//! Failure aggregation and improvement suggestions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Outcome of one step, as seen by the self-improvement tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure { issue: String },
}

impl StepOutcome {
    pub fn failure(issue: impl Into<String>) -> Self {
        Self::Failure {
            issue: issue.into(),
        }
    }
}

/// Running aggregate of a step's outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub step_name: String,
    pub failure_count: u32,
    pub common_issues: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub total_outcomes: u32,
    pub success_count: u32,
}

impl FailureAnalysis {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            failure_count: 0,
            common_issues: BTreeSet::new(),
            last_failure_time: None,
            success_rate: 0.0,
            total_outcomes: 0,
            success_count: 0,
        }
    }

    /// Fold an outcome in. The success rate is recomputed from the counters.
    pub fn record(&mut self, outcome: &StepOutcome) {
        self.total_outcomes += 1;
        match outcome {
            StepOutcome::Success => self.success_count += 1,
            StepOutcome::Failure { issue } => {
                self.failure_count += 1;
                self.common_issues.insert(issue.clone());
                self.last_failure_time = Some(Utc::now());
            }
        }
        self.success_rate = f64::from(self.success_count) / f64::from(self.total_outcomes);
    }
}

/// Kind of change an improvement suggestion proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    RetryStrategy,
    ThresholdAdjustment,
    AlternativeSource,
    PromptImprovement,
    CodeFix,
    Configuration,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Review state. The only field of a suggestion that changes after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Reviewed,
    Implemented,
    Rejected,
}

/// Structured payload the reasoning capability must return for a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionDraft {
    pub failure_pattern: String,
    pub suggestion_type: SuggestionType,
    pub title: String,
    pub description: String,
    pub priority: SuggestionPriority,
    pub estimated_impact: String,
}

/// Human-reviewable improvement suggestion for a repeatedly failing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub step_name: String,
    pub failure_pattern: String,
    pub suggestion_type: SuggestionType,
    pub title: String,
    pub description: String,
    pub priority: SuggestionPriority,
    pub estimated_impact: String,
    pub status: SuggestionStatus,
}

impl ImprovementSuggestion {
    pub fn from_draft(step_name: impl Into<String>, draft: SuggestionDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            step_name: step_name.into(),
            failure_pattern: draft.failure_pattern,
            suggestion_type: draft.suggestion_type,
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            estimated_impact: draft.estimated_impact,
            status: SuggestionStatus::Pending,
        }
    }
}
