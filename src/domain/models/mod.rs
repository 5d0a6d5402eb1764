pub mod config;
pub mod decision;
pub mod evaluation;
pub mod improvement;
pub mod pipeline_log;
pub mod raw_output;
pub mod retry;

pub use config::{
    BatchConfig, Config, LoggingConfig, ReasoningConfig, RetryConfig, RunnerConfig,
    TrackerConfig, TrackerScope,
};
pub use decision::{AiDecision, Decision, StepResult, StepStatus};
pub use evaluation::{MetricValue, Quality, StepEvaluation};
pub use improvement::{
    FailureAnalysis, ImprovementSuggestion, StepOutcome, SuggestionDraft, SuggestionPriority,
    SuggestionStatus, SuggestionType,
};
pub use pipeline_log::{
    AttemptError, AttemptErrorKind, CallAttempt, LogType, RunStatus, RunSummary, StepLog,
    StepRecord, TokenUsage,
};
pub use raw_output::{RawStepOutput, SearchHit};
pub use retry::{
    FallbackBehavior, RetryContext, RetryModification, StepInput, StepRetryConfig, StrategyKind,
};
