//! In-memory pipeline store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{ImprovementSuggestion, RunStatus, StepLog, SuggestionStatus};
use crate::domain::ports::{PersistenceError, PipelineStore};

#[derive(Default)]
struct StoreState {
    entries: HashMap<Uuid, Vec<StepLog>>,
    statuses: HashMap<Uuid, Vec<RunStatus>>,
    suggestions: Vec<ImprovementSuggestion>,
}

/// Keeps everything in process memory; inspectable after a run.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self, run_id: Uuid) -> Vec<StepLog> {
        self.state
            .read()
            .await
            .entries
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Status history of a run, oldest first.
    pub async fn status_history(&self, run_id: Uuid) -> Vec<RunStatus> {
        self.state
            .read()
            .await
            .statuses
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn run_status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.status_history(run_id).await.last().copied()
    }

    pub async fn suggestions(&self) -> Vec<ImprovementSuggestion> {
        self.state.read().await.suggestions.clone()
    }
}

#[async_trait]
impl PipelineStore for InMemoryStore {
    async fn append_log_entry(&self, run_id: Uuid, entry: &StepLog) -> Result<(), PersistenceError> {
        self.state
            .write()
            .await
            .entries
            .entry(run_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn save_suggestion(&self, suggestion: &ImprovementSuggestion) -> Result<(), PersistenceError> {
        self.state.write().await.suggestions.push(suggestion.clone());
        Ok(())
    }

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), PersistenceError> {
        self.state
            .write()
            .await
            .statuses
            .entry(run_id)
            .or_default()
            .push(status);
        Ok(())
    }

    async fn update_suggestion_status(
        &self,
        id: Uuid,
        status: SuggestionStatus,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.write().await;
        let suggestion = state
            .suggestions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(PersistenceError::SuggestionNotFound(id))?;
        suggestion.status = status;
        Ok(())
    }
}
