//! Null pipeline store implementation.
//!
//! Used when nothing needs to outlive the process but the orchestrator
//! requires a PipelineStore.

use async_trait::async_trait;
use uuid::Uuid;

use super::{PersistenceError, PipelineStore};
use crate::domain::models::{ImprovementSuggestion, RunStatus, StepLog, SuggestionStatus};

/// A no-op store that keeps nothing.
#[derive(Debug, Clone, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PipelineStore for NullStore {
    async fn append_log_entry(&self, _run_id: Uuid, _entry: &StepLog) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn save_suggestion(&self, _suggestion: &ImprovementSuggestion) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn update_run_status(&self, _run_id: Uuid, _status: RunStatus) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn update_suggestion_status(
        &self,
        _id: Uuid,
        _status: SuggestionStatus,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}
