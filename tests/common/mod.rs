//! Common test utilities for integration tests
//!
//! Provides a scripted reasoning capability, output builders for the research
//! step shapes, and small async helpers shared across the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use pipewright::domain::ports::ChatMessage;
use pipewright::services::{action_fn, StepAction};
use pipewright::{ReasoningCapability, ReasoningError, TaskKind};

/// Create a temporary directory for test isolation
///
/// Returns a TempDir that will be cleaned up when dropped.
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for an async condition with timeout, polling every 10ms.
pub async fn wait_for<F, Fut>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

/// Reasoning capability that answers from a per-task script and counts calls.
#[derive(Default)]
pub struct MockReasoning {
    replies: HashMap<TaskKind, String>,
    calls: AtomicU32,
    tasks: Mutex<Vec<TaskKind>>,
}

impl MockReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, task: TaskKind, reply: impl Into<String>) -> Self {
        self.replies.insert(task, reply.into());
        self
    }

    /// Replies with a valid suggestion draft for failure analysis.
    pub fn with_suggestions(self) -> Self {
        self.with_reply(
            TaskKind::FailureAnalysis,
            json!({
                "failure_pattern": "search keeps returning nothing",
                "suggestion_type": "alternative_source",
                "title": "Add a second news provider",
                "description": "Query a second provider when the first one is empty.",
                "priority": "high",
                "estimated_impact": "fewer empty searches"
            })
            .to_string(),
        )
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, task: TaskKind) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| **t == task)
            .count()
    }
}

#[async_trait]
impl ReasoningCapability for MockReasoning {
    async fn call(
        &self,
        task: TaskKind,
        _messages: &[ChatMessage],
        _temperature: f32,
        _structured_output: bool,
    ) -> Result<String, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push(task);
        self.replies
            .get(&task)
            .cloned()
            .ok_or_else(|| ReasoningError::Other(format!("no scripted reply for {task}")))
    }
}

pub fn keywords(n: usize) -> Value {
    let words: Vec<String> = (0..n).map(|i| format!("keyword {i}")).collect();
    json!({ "kind": "keywords", "data": words })
}

pub fn search_results(n: usize) -> Value {
    let hits: Vec<Value> = (0..n)
        .map(|i| json!({ "title": format!("result {i}"), "url": format!("https://news.example/{i}") }))
        .collect();
    json!({ "kind": "search_results", "data": hits })
}

pub fn scraped(attempted: usize, succeeded: usize) -> Value {
    json!({ "kind": "scraped", "data": { "attempted": attempted, "succeeded": succeeded } })
}

/// Action that always returns `value` and counts its executions.
pub fn constant_action(value: Value, calls: Arc<AtomicU32>) -> Arc<dyn StepAction<Value>> {
    action_fn(move |_input, _ctx| {
        let value = value.clone();
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    })
}

/// Action that always fails and counts its executions.
pub fn failing_action(message: &'static str, calls: Arc<AtomicU32>) -> Arc<dyn StepAction<Value>> {
    action_fn(move |_input, _ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!(message))
        }
    })
}
