pub mod batch;
pub mod decision_policy;
pub mod dependency_graph;
pub mod evaluators;
pub mod improvement_tracker;
pub mod orchestrator;
pub mod pipeline_log;
pub mod retry_strategy;
pub mod step_runner;
pub mod strategy_catalog;
pub mod structured_output;

pub use batch::{run_batched, BatchOutcome};
pub use decision_policy::{DecisionPolicy, DecisionRequest};
pub use dependency_graph::StepDependencyGraph;
pub use improvement_tracker::ImprovementTracker;
pub use orchestrator::{Orchestrator, PipelineRun, PipelineStep};
pub use pipeline_log::PipelineLog;
pub use retry_strategy::{RetryStrategy, RetryStrategyEngine};
pub use step_runner::{
    action_fn, RerunOutcome, RunScope, StepAction, StepConfig, StepContext, StepRunner,
    UpstreamRerun,
};
pub use strategy_catalog::StrategyCatalog;
pub use structured_output::{parse_structured, StructuredOutputError};
