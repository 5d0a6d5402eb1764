//! Self-improvement tracker.
//!
//! Aggregates step outcomes into a [`FailureAnalysis`] per step. When a step
//! crosses the failure threshold, the reasoning capability is asked once for a
//! reviewable [`ImprovementSuggestion`], which is persisted and returned.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::structured_output::parse_structured;
use crate::domain::models::{
    FailureAnalysis, ImprovementSuggestion, StepLog, StepOutcome, SuggestionDraft, TrackerConfig,
};
use crate::domain::ports::{ChatMessage, NullStore, PipelineStore, ReasoningCapability, TaskKind};

/// Failures per step before a suggestion is requested.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Recent log entries handed to the reasoning capability.
pub const DEFAULT_RECENT_LOG_ENTRIES: usize = 10;

#[derive(Default)]
struct TrackerState {
    analyses: HashMap<String, FailureAnalysis>,
    /// Steps that already had a suggestion requested for the current crossing.
    suggested: HashSet<String>,
}

pub struct ImprovementTracker {
    failure_threshold: u32,
    recent_log_entries: usize,
    temperature: f32,
    reasoning: Option<Arc<dyn ReasoningCapability>>,
    store: Arc<dyn PipelineStore>,
    state: RwLock<TrackerState>,
}

impl ImprovementTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recent_log_entries: config.recent_log_entries,
            temperature: 0.3,
            reasoning: None,
            store: Arc::new(NullStore::new()),
            state: RwLock::new(TrackerState::default()),
        }
    }

    pub fn with_reasoning(mut self, reasoning: Arc<dyn ReasoningCapability>) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Record one outcome. Returns a suggestion when this outcome crossed the
    /// threshold and the reasoning capability produced a valid one.
    pub async fn record_outcome(
        &self,
        step_name: &str,
        outcome: StepOutcome,
        recent_logs: &[StepLog],
    ) -> Option<ImprovementSuggestion> {
        let analysis = {
            let mut state = self.state.write().await;
            let analysis = state
                .analyses
                .entry(step_name.to_string())
                .or_insert_with(|| FailureAnalysis::new(step_name));
            analysis.record(&outcome);

            let crossed = matches!(outcome, StepOutcome::Failure { .. })
                && analysis.failure_count >= self.failure_threshold;
            if !crossed {
                return None;
            }
            let analysis = analysis.clone();
            if !state.suggested.insert(step_name.to_string()) {
                return None;
            }
            analysis
        };

        info!(
            step = step_name,
            failure_count = analysis.failure_count,
            "Failure threshold reached, requesting improvement suggestion"
        );

        match self.request_suggestion(&analysis, recent_logs).await {
            Ok(suggestion) => {
                if let Err(e) = self.store.save_suggestion(&suggestion).await {
                    warn!(step = step_name, error = %e, "Failed to persist improvement suggestion");
                }
                Some(suggestion)
            }
            Err(reason) => {
                warn!(step = step_name, error = %reason, "No improvement suggestion produced");
                self.state.write().await.suggested.remove(step_name);
                None
            }
        }
    }

    async fn request_suggestion(
        &self,
        analysis: &FailureAnalysis,
        recent_logs: &[StepLog],
    ) -> Result<ImprovementSuggestion, String> {
        let reasoning = self
            .reasoning
            .as_ref()
            .ok_or_else(|| "no reasoning capability configured".to_string())?;

        let skip = recent_logs.len().saturating_sub(self.recent_log_entries);
        let details = json!({
            "analysis": analysis,
            "recent_logs": &recent_logs[skip..],
        });
        let messages = [
            ChatMessage::system(
                "A research pipeline step keeps failing. Propose one concrete, reviewable \
                 improvement. Reply with one JSON object: {\"failure_pattern\", \
                 \"suggestion_type\" (retry_strategy|threshold_adjustment|alternative_source|\
                 prompt_improvement|code_fix|configuration), \"title\", \"description\", \
                 \"priority\" (low|medium|high|critical), \"estimated_impact\"}.",
            ),
            ChatMessage::user(details.to_string()),
        ];

        let raw = reasoning
            .call(TaskKind::FailureAnalysis, &messages, self.temperature, true)
            .await
            .map_err(|e| e.to_string())?;
        let draft: SuggestionDraft = parse_structured(&raw).map_err(|e| e.to_string())?;
        Ok(ImprovementSuggestion::from_draft(&analysis.step_name, draft))
    }

    pub async fn analysis(&self, step_name: &str) -> Option<FailureAnalysis> {
        self.state.read().await.analyses.get(step_name).cloned()
    }

    /// All aggregates, sorted by step name.
    pub async fn analyses(&self) -> Vec<FailureAnalysis> {
        let mut all: Vec<FailureAnalysis> =
            self.state.read().await.analyses.values().cloned().collect();
        all.sort_by(|a, b| a.step_name.cmp(&b.step_name));
        all
    }

    /// Forget a step's aggregate, allowing a new suggestion later.
    pub async fn reset(&self, step_name: &str) {
        let mut state = self.state.write().await;
        state.analyses.remove(step_name);
        state.suggested.remove(step_name);
    }

    pub async fn reset_all(&self) {
        let mut state = self.state.write().await;
        state.analyses.clear();
        state.suggested.clear();
    }
}

impl Default for ImprovementTracker {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}
