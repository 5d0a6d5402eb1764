//! Provider chain
//!
//! Routes a reasoning call through providers in priority order. Each provider
//! is retried on transient errors; quota exhaustion or used-up retries move
//! the call on to the next provider.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::domain::ports::{ChatMessage, ReasoningCapability, ReasoningError, TaskKind};

/// A provider registered in the chain
struct ChainEntry {
    name: String,
    provider: Arc<dyn ReasoningCapability>,
    /// Tasks this provider serves; `None` means all
    tasks: Option<HashSet<TaskKind>>,
}

impl ChainEntry {
    fn serves(&self, task: TaskKind) -> bool {
        self.tasks.as_ref().is_none_or(|tasks| tasks.contains(&task))
    }
}

/// Reasoning capability backed by several providers
pub struct ProviderChain {
    entries: Vec<ChainEntry>,
    retry: RetryPolicy,
}

impl ProviderChain {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            entries: Vec::new(),
            retry,
        }
    }

    /// Append a provider serving every task kind
    pub fn with_provider(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn ReasoningCapability>,
    ) -> Self {
        self.entries.push(ChainEntry {
            name: name.into(),
            provider,
            tasks: None,
        });
        self
    }

    /// Append a provider restricted to the given task kinds
    pub fn with_restricted_provider<I>(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn ReasoningCapability>,
        tasks: I,
    ) -> Self
    where
        I: IntoIterator<Item = TaskKind>,
    {
        self.entries.push(ChainEntry {
            name: name.into(),
            provider,
            tasks: Some(tasks.into_iter().collect()),
        });
        self
    }

    /// Provider names in priority order
    pub fn provider_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ReasoningCapability for ProviderChain {
    async fn call(
        &self,
        task: TaskKind,
        messages: &[ChatMessage],
        temperature: f32,
        structured_output: bool,
    ) -> Result<String, ReasoningError> {
        let mut last_error = None;

        for entry in self.entries.iter().filter(|e| e.serves(task)) {
            debug!(provider = %entry.name, task = %task, "Calling reasoning provider");
            let result = self
                .retry
                .execute(|| entry.provider.call(task, messages, temperature, structured_output))
                .await;

            match result {
                Ok(text) => {
                    if last_error.is_some() {
                        info!(provider = %entry.name, task = %task, "Reasoning call served by fallback provider");
                    }
                    return Ok(text);
                }
                Err(e) => {
                    warn!(provider = %entry.name, task = %task, error = %e, "Reasoning provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ReasoningError::Other(format!("no reasoning provider configured for {task}"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        reply: Result<String, ReasoningError>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicU32::new(0),
            })
        }

        fn err(error: ReasoningError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(error),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReasoningCapability for ScriptedProvider {
        async fn call(
            &self,
            _task: TaskKind,
            _messages: &[ChatMessage],
            _temperature: f32,
            _structured_output: bool,
        ) -> Result<String, ReasoningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, 1, 2)
    }

    #[tokio::test]
    async fn test_quota_moves_to_next_provider_without_retry() {
        let primary = ScriptedProvider::err(ReasoningError::QuotaExceeded("monthly".into()));
        let secondary = ScriptedProvider::ok("{}");
        let chain = ProviderChain::new(fast_retry())
            .with_provider("primary", primary.clone())
            .with_provider("secondary", secondary.clone());

        let reply = chain
            .call(TaskKind::StepDecision, &[], 0.3, true)
            .await
            .unwrap();
        assert_eq!(reply, "{}");
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_before_moving_on() {
        let primary = ScriptedProvider::err(ReasoningError::RateLimit("429".into()));
        let secondary = ScriptedProvider::ok("ok");
        let chain = ProviderChain::new(fast_retry())
            .with_provider("primary", primary.clone())
            .with_provider("secondary", secondary.clone());

        chain
            .call(TaskKind::FailureAnalysis, &[], 0.3, false)
            .await
            .unwrap();
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_last_error_returned_when_all_fail() {
        let chain = ProviderChain::new(fast_retry())
            .with_provider("a", ScriptedProvider::err(ReasoningError::QuotaExceeded("a".into())))
            .with_provider("b", ScriptedProvider::err(ReasoningError::Other("b".into())));

        let err = chain
            .call(TaskKind::StepDecision, &[], 0.3, true)
            .await
            .unwrap_err();
        assert_eq!(err, ReasoningError::Other("b".into()));
    }

    #[tokio::test]
    async fn test_task_restrictions() {
        let analysis_only = ScriptedProvider::ok("analysis");
        let general = ScriptedProvider::ok("general");
        let chain = ProviderChain::new(fast_retry())
            .with_restricted_provider("analysis", analysis_only.clone(), [TaskKind::FailureAnalysis])
            .with_provider("general", general.clone());

        let reply = chain
            .call(TaskKind::StrategySelection, &[], 0.3, true)
            .await
            .unwrap();
        assert_eq!(reply, "general");
        assert_eq!(analysis_only.calls(), 0);

        let reply = chain
            .call(TaskKind::FailureAnalysis, &[], 0.3, true)
            .await
            .unwrap();
        assert_eq!(reply, "analysis");
    }

    #[tokio::test]
    async fn test_empty_chain_errors() {
        let chain = ProviderChain::new(fast_retry());
        assert!(chain.is_empty());
        let err = chain
            .call(TaskKind::StepDecision, &[], 0.3, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ReasoningError::Other(_)));
    }
}
