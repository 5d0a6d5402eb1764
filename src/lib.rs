//! Pipewright - research pipeline orchestration core
//!
//! Pipewright runs multi-stage research pipelines (keyword generation, news and
//! video search, scraping, transcription, summarization, classification,
//! analysis) and decides, after every step, whether its output is good enough
//! to continue, worth retrying with a different strategy, or should be skipped.
//! Repeated failures of a step are turned into reviewable improvement
//! suggestions.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): evaluators, retry strategies, decision
//!   policy, step runner, orchestrator, pipeline log, improvement tracker
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging,
//!   reasoning provider chain, stores
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use pipewright::services::{action_fn, Orchestrator, PipelineStep};
//!
//! let run = Orchestrator::from_config(&config, None, store)
//!     .with_step(PipelineStep::new("generate_keywords", action_fn(generate)))
//!     .run("Sudan Civil War 2024")
//!     .await;
//! println!("{}", run.status);
//! ```

#![allow(missing_docs)]

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{PipelineError, PipelineResult};
pub use domain::models::{
    AiDecision, Config, Decision, ImprovementSuggestion, LogType, Quality, RetryContext,
    RetryModification, RunStatus, RunSummary, StepEvaluation, StepLog, StepResult,
    StepRetryConfig, StepStatus, StrategyKind,
};
pub use domain::ports::{PipelineStore, ReasoningCapability, ReasoningError, TaskKind};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    action_fn, DecisionPolicy, ImprovementTracker, Orchestrator, PipelineLog, PipelineRun,
    PipelineStep, RetryStrategyEngine, StepRunner, StrategyCatalog,
};
