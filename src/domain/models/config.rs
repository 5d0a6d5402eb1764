use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::retry::StepRetryConfig;

/// Main configuration structure for pipewright
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Step runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Self-improvement tracker configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Fan-out batching used by step actions
    #[serde(default)]
    pub batch: BatchConfig,

    /// Reasoning capability usage
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Per-step retry overrides, merged over the built-in research catalog
    #[serde(default)]
    pub steps: HashMap<String, StepRetryConfig>,

    /// Priority-ordered alternative implementations per step
    #[serde(default)]
    pub alternatives: HashMap<String, Vec<String>>,

    /// Data sources per step; the first entry is the one tried initially
    #[serde(default)]
    pub sources: HashMap<String, Vec<String>>,

    /// Upstream steps per step, used for rerun recommendations
    #[serde(default)]
    pub dependencies: HashMap<String, Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling JSON log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Step runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Maximum characters kept in input/output previews
    #[serde(default = "default_preview_len")]
    pub preview_len: usize,
}

const fn default_preview_len() -> usize {
    200
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            preview_len: default_preview_len(),
        }
    }
}

/// Whether failure analysis is shared across runs or isolated per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerScope {
    #[default]
    Shared,
    PerRun,
}

/// Self-improvement tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrackerConfig {
    /// Failures of one step before a suggestion is requested
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Recent log entries handed to the reasoning capability
    #[serde(default = "default_recent_log_entries")]
    pub recent_log_entries: usize,

    #[serde(default)]
    pub scope: TrackerScope,
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_recent_log_entries() -> usize {
    10
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recent_log_entries: default_recent_log_entries(),
            scope: TrackerScope::default(),
        }
    }
}

/// Bounded-concurrency fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Items processed concurrently per batch
    #[serde(default = "default_batch_size")]
    pub size: usize,

    /// Pause between batches, to respect upstream rate limits
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
}

const fn default_batch_size() -> usize {
    4
}

const fn default_inter_batch_delay_ms() -> u64 {
    1_000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
        }
    }
}

/// Reasoning capability usage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReasoningConfig {
    /// Sampling temperature for structured calls
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Ask for a root-cause hypothesis on the first retry of an empty result
    #[serde(default = "default_true")]
    pub enrich_empty_results: bool,

    /// Retry policy applied to each provider
    #[serde(default)]
    pub retry: RetryConfig,
}

const fn default_temperature() -> f32 {
    0.3
}

const fn default_true() -> bool {
    true
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            enrich_empty_results: true,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum retry attempts per provider
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}
