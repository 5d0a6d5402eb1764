use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{ImprovementSuggestion, RunStatus, StepLog, SuggestionStatus};

/// Persistence operation errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Suggestion not found: {0}")]
    SuggestionNotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Repository interface for run logs, statuses and suggestions
///
/// Calls are fire-and-forget from the orchestration core: failures are
/// logged and never abort a pipeline run.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Append one log entry to a run
    async fn append_log_entry(&self, run_id: Uuid, entry: &StepLog) -> Result<(), PersistenceError>;

    /// Persist a newly created suggestion
    async fn save_suggestion(&self, suggestion: &ImprovementSuggestion) -> Result<(), PersistenceError>;

    /// Record a run's lifecycle status
    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), PersistenceError>;

    /// Move a suggestion through review
    async fn update_suggestion_status(
        &self,
        id: Uuid,
        status: SuggestionStatus,
    ) -> Result<(), PersistenceError>;
}
