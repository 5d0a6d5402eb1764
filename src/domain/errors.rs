//! Domain errors for the pipewright orchestration core.

use thiserror::Error;

/// Domain-level errors that can occur in the orchestration core.
///
/// None of these escape `StepRunner::run_step` or `Orchestrator::run`; they
/// surface from the boundary helpers (output validation, config, stores).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Invalid output for step {step}: {reason}")]
    InvalidOutput { step: String, reason: String },

    #[error("Reasoning capability failed: {0}")]
    Reasoning(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Run {0} was cancelled")]
    Cancelled(uuid::Uuid),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<crate::domain::ports::ReasoningError> for PipelineError {
    fn from(err: crate::domain::ports::ReasoningError) -> Self {
        PipelineError::Reasoning(err.to_string())
    }
}

impl From<crate::domain::ports::PersistenceError> for PipelineError {
    fn from(err: crate::domain::ports::PersistenceError) -> Self {
        PipelineError::Persistence(err.to_string())
    }
}
