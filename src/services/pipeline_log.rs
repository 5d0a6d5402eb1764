//! Append-only per-run pipeline log.
//!
//! Holds the ordered [`StepLog`] entries of one run, one [`StepRecord`] per
//! step with its call attempts, and the run status. Every append is forwarded
//! to the [`PipelineStore`] inline; store failures are logged and ignored.
//! Run statistics are derived on every [`PipelineLog::summary`] call.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::domain::models::{
    AttemptError, CallAttempt, LogType, RunStatus, RunSummary, StepLog, StepRecord, StepStatus,
    TokenUsage,
};
use crate::domain::ports::{NullStore, PipelineStore};
use crate::infrastructure::logging::SecretScrubber;

pub const DEFAULT_PREVIEW_LEN: usize = 200;

const ELLIPSIS: &str = "...";

struct LogState {
    entries: Vec<StepLog>,
    steps: Vec<StepRecord>,
    status: RunStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl LogState {
    fn record_mut(&mut self, step_name: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|r| r.step_name == step_name)
    }
}

pub struct PipelineLog {
    run_id: Uuid,
    store: Arc<dyn PipelineStore>,
    scrubber: SecretScrubber,
    preview_len: usize,
    state: RwLock<LogState>,
}

impl PipelineLog {
    pub fn new(run_id: Uuid, store: Arc<dyn PipelineStore>) -> Self {
        Self {
            run_id,
            store,
            scrubber: SecretScrubber::new(),
            preview_len: DEFAULT_PREVIEW_LEN,
            state: RwLock::new(LogState {
                entries: Vec::new(),
                steps: Vec::new(),
                status: RunStatus::Pending,
                started_at: Utc::now(),
                finished_at: None,
            }),
        }
    }

    /// Log with a fresh run id and nowhere to persist to.
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4(), Arc::new(NullStore::new()))
    }

    pub fn with_preview_len(mut self, preview_len: usize) -> Self {
        self.preview_len = preview_len;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Bounded, secret-scrubbed rendering of a payload.
    pub fn preview(&self, value: &Value) -> String {
        let raw = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let scrubbed = self.scrubber.scrub(&raw);
        if scrubbed.chars().count() <= self.preview_len {
            return scrubbed;
        }
        let keep = self.preview_len.saturating_sub(ELLIPSIS.len());
        let mut truncated: String = scrubbed.chars().take(keep).collect();
        truncated.push_str(ELLIPSIS);
        truncated
    }

    /// Append an entry. `success` entries are refused once the run is
    /// cancelled; returns whether the entry was kept.
    pub async fn append(&self, entry: StepLog) -> bool {
        {
            let mut state = self.state.write().await;
            if state.status == RunStatus::Cancelled && entry.log_type == LogType::Success {
                return false;
            }
            state.entries.push(entry.clone());
        }

        if let Err(e) = self.store.append_log_entry(self.run_id, &entry).await {
            warn!(run_id = %self.run_id, step = %entry.step_name, error = %e, "Failed to persist log entry");
        }
        true
    }

    pub async fn record(&self, step_name: &str, log_type: LogType, message: impl Into<String>) -> bool {
        self.append(StepLog::new(step_name, log_type, message)).await
    }

    pub async fn record_with_data(
        &self,
        step_name: &str,
        log_type: LogType,
        message: impl Into<String>,
        data: Value,
    ) -> bool {
        self.append(StepLog::new(step_name, log_type, message).with_data(data))
            .await
    }

    /// Mark a step as running. A step started again (an upstream rerun)
    /// keeps its earlier attempts.
    pub async fn start_step(&self, step_name: &str, input: &Value) {
        let input_preview = self.preview(input);
        let now = Utc::now();
        let mut state = self.state.write().await;
        if let Some(record) = state.record_mut(step_name) {
            record.status = StepStatus::Running;
            record.started_at = now;
            record.completed_at = None;
            record.duration_ms = None;
            record.input_preview = input_preview;
            record.input = input.clone();
            return;
        }
        state.steps.push(StepRecord {
            step_name: step_name.to_string(),
            status: StepStatus::Running,
            started_at: now,
            completed_at: None,
            duration_ms: None,
            input_preview,
            input: input.clone(),
            output_preview: None,
            output: None,
            attempts: Vec::new(),
        });
    }

    /// Close a step record. Once the run is cancelled, a record that is
    /// already terminal is left alone and any other ends as cancelled.
    pub async fn finish_step(&self, step_name: &str, status: StepStatus, output: Option<&Value>) {
        let output_preview = output.map(|v| self.preview(v));
        let now = Utc::now();
        let mut state = self.state.write().await;
        let cancelled = state.status == RunStatus::Cancelled;
        if let Some(record) = state.record_mut(step_name) {
            if cancelled {
                if !record.status.is_terminal() {
                    record.status = StepStatus::Cancelled;
                    record.completed_at = Some(now);
                    record.duration_ms = Some((now - record.started_at).num_milliseconds());
                }
                return;
            }
            record.status = status;
            record.completed_at = Some(now);
            record.duration_ms = Some((now - record.started_at).num_milliseconds());
            record.output_preview = output_preview;
            record.output = output.cloned();
        }
    }

    /// Start an external-call attempt; returns its 1-based order.
    pub async fn begin_attempt(&self, step_name: &str, target: impl Into<String>) -> u32 {
        let mut state = self.state.write().await;
        if state.record_mut(step_name).is_none() {
            state.steps.push(StepRecord {
                step_name: step_name.to_string(),
                status: StepStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
                input_preview: String::new(),
                input: Value::Null,
                output_preview: None,
                output: None,
                attempts: Vec::new(),
            });
        }
        let Some(record) = state.record_mut(step_name) else {
            return 0;
        };
        let order = u32::try_from(record.attempts.len()).unwrap_or(u32::MAX - 1) + 1;
        record.attempts.push(CallAttempt {
            order,
            target: target.into(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            tokens: None,
            error: None,
        });
        order
    }

    pub async fn finish_attempt(
        &self,
        step_name: &str,
        order: u32,
        tokens: Option<TokenUsage>,
        error: Option<AttemptError>,
    ) {
        let mut state = self.state.write().await;
        let Some(attempt) = state
            .record_mut(step_name)
            .and_then(|r| r.attempts.iter_mut().find(|a| a.order == order))
        else {
            return;
        };
        attempt.finished_at = Some(Utc::now());
        attempt.success = error.is_none();
        attempt.tokens = tokens;
        attempt.error = error;
    }

    pub async fn entries(&self) -> Vec<StepLog> {
        self.state.read().await.entries.clone()
    }

    pub async fn entries_for(&self, step_name: &str) -> Vec<StepLog> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.step_name == step_name)
            .cloned()
            .collect()
    }

    /// Last `limit` entries of a step, oldest first.
    pub async fn recent_entries(&self, step_name: &str, limit: usize) -> Vec<StepLog> {
        let mut entries = self.entries_for(step_name).await;
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        entries
    }

    pub async fn steps(&self) -> Vec<StepRecord> {
        self.state.read().await.steps.clone()
    }

    pub async fn step(&self, step_name: &str) -> Option<StepRecord> {
        self.state
            .read()
            .await
            .steps
            .iter()
            .find(|r| r.step_name == step_name)
            .cloned()
    }

    pub async fn status(&self) -> RunStatus {
        self.state.read().await.status
    }

    pub async fn is_cancelled(&self) -> bool {
        self.status().await == RunStatus::Cancelled
    }

    /// Move the run to `status` and persist it. A cancelled run stays
    /// cancelled.
    pub async fn set_status(&self, status: RunStatus) -> RunStatus {
        let (applied, changed) = {
            let mut state = self.state.write().await;
            let changed = state.status != RunStatus::Cancelled && state.status != status;
            if changed {
                state.status = status;
                if status.is_terminal() {
                    state.finished_at = Some(Utc::now());
                }
            }
            (state.status, changed)
        };
        if changed {
            self.persist_status(status).await;
        }
        applied
    }

    /// Transition to `cancelled`. Steps still running are marked cancelled;
    /// existing entries are left as they are. Returns false if the run was
    /// already cancelled.
    pub async fn mark_cancelled(&self) -> bool {
        {
            let mut state = self.state.write().await;
            if state.status == RunStatus::Cancelled {
                return false;
            }
            state.status = RunStatus::Cancelled;
            let now = Utc::now();
            state.finished_at = Some(now);
            for record in state.steps.iter_mut().filter(|r| !r.status.is_terminal()) {
                record.status = StepStatus::Cancelled;
                record.completed_at = Some(now);
                record.duration_ms = Some((now - record.started_at).num_milliseconds());
            }
        }
        self.persist_status(RunStatus::Cancelled).await;
        true
    }

    async fn persist_status(&self, status: RunStatus) {
        if let Err(e) = self.store.update_run_status(self.run_id, status).await {
            warn!(run_id = %self.run_id, status = %status, error = %e, "Failed to persist run status");
        }
    }

    /// Run statistics, computed from the current contents.
    pub async fn summary(&self) -> RunSummary {
        let state = self.state.read().await;
        let end = state.finished_at.unwrap_or_else(Utc::now);

        let mut succeeded_targets = BTreeSet::new();
        let mut failed_targets = BTreeSet::new();
        for attempt in state.steps.iter().flat_map(|r| r.attempts.iter()) {
            if attempt.success {
                succeeded_targets.insert(attempt.target.clone());
            } else if attempt.is_finished() {
                failed_targets.insert(attempt.target.clone());
            }
        }

        let count = |pred: fn(&StepStatus) -> bool| {
            state.steps.iter().filter(|r| pred(&r.status)).count()
        };

        RunSummary {
            run_id: self.run_id,
            status: state.status,
            total_duration_ms: (end - state.started_at).num_milliseconds(),
            steps_completed: count(StepStatus::is_completed),
            steps_failed: count(|s| {
                matches!(
                    s,
                    StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
                )
            }),
            steps_degraded: count(|s| *s == StepStatus::ContinuedDegraded),
            succeeded_targets: succeeded_targets.into_iter().collect(),
            failed_targets: failed_targets.into_iter().collect(),
            entry_count: state.entries.len(),
        }
    }
}

impl std::fmt::Debug for PipelineLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLog")
            .field("run_id", &self.run_id)
            .field("preview_len", &self.preview_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AttemptErrorKind, ImprovementSuggestion, SuggestionStatus};
    use crate::domain::ports::PersistenceError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FailingStore {
        appends: AtomicU32,
    }

    #[async_trait]
    impl PipelineStore for FailingStore {
        async fn append_log_entry(&self, _run_id: Uuid, _entry: &StepLog) -> Result<(), PersistenceError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            Err(PersistenceError::Unavailable("disk full".into()))
        }

        async fn save_suggestion(&self, _s: &ImprovementSuggestion) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("disk full".into()))
        }

        async fn update_run_status(&self, _run_id: Uuid, _status: RunStatus) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("disk full".into()))
        }

        async fn update_suggestion_status(
            &self,
            _id: Uuid,
            _status: SuggestionStatus,
        ) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_entries_keep_append_order() {
        let log = PipelineLog::detached();
        log.record("search_news", LogType::Info, "starting").await;
        log.record("search_news", LogType::Warning, "retrying").await;
        log.record("scrape_articles", LogType::Info, "starting").await;

        let messages: Vec<String> = log.entries().await.into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["starting", "retrying", "starting"]);
        assert_eq!(log.entries_for("search_news").await.len(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_ignored() {
        let store = Arc::new(FailingStore::default());
        let log = PipelineLog::new(Uuid::new_v4(), store.clone());
        assert!(log.record("s", LogType::Info, "starting").await);
        assert_eq!(log.entries().await.len(), 1);
        assert_eq!(store.appends.load(Ordering::SeqCst), 1);
        assert_eq!(log.set_status(RunStatus::Running).await, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_preview_is_bounded_and_scrubbed() {
        let log = PipelineLog::detached().with_preview_len(40);
        let preview = log.preview(&json!({"token": "abcdefghijklmnopqrstuvwxyz", "q": "x".repeat(100)}));
        assert!(preview.chars().count() <= 40);
        assert!(!preview.contains("abcdefghijklmnop"));
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn test_attempts_are_ordered_and_summarized() {
        let log = PipelineLog::detached();
        log.start_step("summarize_articles", &json!({"articles": 3})).await;

        let first = log.begin_attempt("summarize_articles", "model-a").await;
        log.finish_attempt(
            "summarize_articles",
            first,
            None,
            Some(AttemptError::new(AttemptErrorKind::RateLimit, "429").with_code("429")),
        )
        .await;
        let second = log.begin_attempt("summarize_articles", "model-b").await;
        log.finish_attempt(
            "summarize_articles",
            second,
            Some(TokenUsage {
                input_tokens: 120,
                output_tokens: 40,
            }),
            None,
        )
        .await;
        log.finish_step("summarize_articles", StepStatus::Success, Some(&json!("ok")))
            .await;

        assert_eq!((first, second), (1, 2));
        let record = log.step("summarize_articles").await.unwrap();
        assert_eq!(record.attempts.len(), 2);
        assert!(record.duration_ms.is_some());

        let summary = log.summary().await;
        assert_eq!(summary.steps_completed, 1);
        assert_eq!(summary.succeeded_targets, ["model-b"]);
        assert_eq!(summary.failed_targets, ["model-a"]);
    }

    #[tokio::test]
    async fn test_cancel_refuses_success_entries() {
        let log = PipelineLog::detached();
        log.start_step("scrape_articles", &Value::Null).await;
        log.record("scrape_articles", LogType::Info, "starting").await;

        assert!(log.mark_cancelled().await);
        assert!(!log.mark_cancelled().await);
        assert!(!log.record("scrape_articles", LogType::Success, "done").await);
        assert!(log.record("scrape_articles", LogType::Warning, "cancelled").await);

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "starting");
        assert_eq!(
            log.step("scrape_articles").await.unwrap().status,
            StepStatus::Cancelled
        );
        assert_eq!(log.set_status(RunStatus::Completed).await, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_finish_after_cancel_keeps_record_cancelled() {
        let log = PipelineLog::detached();
        log.start_step("search_news", &json!({"query": "sudan"})).await;
        assert!(log.mark_cancelled().await);

        log.finish_step("search_news", StepStatus::Success, Some(&json!({"hits": 4})))
            .await;

        let record = log.step("search_news").await.unwrap();
        assert_eq!(record.status, StepStatus::Cancelled);
        assert!(record.output.is_none());
        assert_eq!(log.summary().await.steps_completed, 0);

        // A step started after the cancel still closes as cancelled.
        log.start_step("scrape_articles", &Value::Null).await;
        log.finish_step("scrape_articles", StepStatus::ContinuedDegraded, None)
            .await;
        assert_eq!(
            log.step("scrape_articles").await.unwrap().status,
            StepStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_recent_entries() {
        let log = PipelineLog::detached();
        for i in 0..15 {
            log.record("search_news", LogType::Warning, format!("attempt {i}")).await;
        }
        let recent = log.recent_entries("search_news", 10).await;
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].message, "attempt 5");
    }
}
