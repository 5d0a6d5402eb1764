//! End-to-end run scenarios through the orchestrator: retry strategies,
//! degraded continuation, improvement suggestions, cancellation and
//! persistence.

mod common;

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use common::{constant_action, failing_action, keywords, scraped, search_results, MockReasoning};
use pipewright::domain::models::{StepRetryConfig, StepStatus, StrategyKind};
use pipewright::infrastructure::store::{InMemoryStore, JsonlStore, RunRecord};
use pipewright::services::{action_fn, Orchestrator, PipelineStep, StepAction};
use pipewright::{Config, LogType, ReasoningCapability, RunStatus, TaskKind};

const TOPIC: &str = "Sudan Civil War 2024";

/// Action that records one input field per execution and returns `value`.
fn recording_action(
    field: &'static str,
    seen: Arc<Mutex<Vec<Option<String>>>>,
    value: Value,
) -> Arc<dyn StepAction<Value>> {
    action_fn(move |input, _ctx| {
        let seen = seen.clone();
        let value = value.clone();
        async move {
            seen.lock()
                .unwrap()
                .push(input.get(field).and_then(Value::as_str).map(str::to_string));
            Ok(value)
        }
    })
}

#[tokio::test]
async fn test_good_outputs_continue_without_reasoning() {
    let reasoning = Arc::new(MockReasoning::new());
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    let orchestrator = Orchestrator::from_config(
        &Config::default(),
        Some(reasoning.clone() as Arc<dyn ReasoningCapability>),
        store.clone(),
    )
    .with_step(PipelineStep::new(
        "generate_keywords",
        constant_action(keywords(6), calls.clone()),
    ))
    .with_step(PipelineStep::new(
        "search_news",
        constant_action(search_results(7), calls.clone()),
    ));

    let run = orchestrator.run(TOPIC).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    for (_, result) in &run.results {
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.retry_count, 0);
    }
    assert_eq!(reasoning.call_count(), 0);
    assert_eq!(
        store.status_history(run.run_id).await,
        [RunStatus::Running, RunStatus::Completed]
    );
    assert!(orchestrator.active_runs().await.is_empty());
}

#[tokio::test]
async fn test_broader_query_walks_the_transform_ladder() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::from_config(&Config::default(), None, Arc::new(InMemoryStore::new()))
        .with_step(PipelineStep::new(
            "search_news",
            recording_action("query", seen.clone(), search_results(0)),
        ));

    let run = orchestrator.run(TOPIC).await;
    let result = run.result("search_news").unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        [
            None,
            Some("Sudan Civil".to_string()),
            Some("Sudan".to_string()),
            Some("Sudan news".to_string()),
        ]
    );
    assert_eq!(result.retry_count, 3);
    // search_news cannot be skipped
    assert_eq!(result.status, StepStatus::ContinuedDegraded);
    assert!(result.success);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.summary.steps_degraded, 1);
}

#[tokio::test]
async fn test_throwing_step_with_single_retry_is_skipped() {
    let mut config = Config::default();
    config.steps.insert(
        "lookup_archive".to_string(),
        StepRetryConfig::new(StrategyKind::Skip, 1, true),
    );
    let lookup_calls = Arc::new(AtomicU32::new(0));
    let keyword_calls = Arc::new(AtomicU32::new(0));

    let orchestrator = Orchestrator::from_config(&config, None, Arc::new(InMemoryStore::new()))
        .with_step(PipelineStep::new(
            "lookup_archive",
            failing_action("archive unreachable", lookup_calls.clone()),
        ))
        .with_step(PipelineStep::new(
            "generate_keywords",
            constant_action(keywords(5), keyword_calls.clone()),
        ));

    let run = orchestrator.run(TOPIC).await;
    let result = run.result("lookup_archive").unwrap();

    assert_eq!(lookup_calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.status, StepStatus::Skipped);
    assert!(!result.success);
    assert_eq!(result.retry_count, 1);

    let entries = run.log.entries_for("lookup_archive").await;
    let count = |t: LogType| entries.iter().filter(|e| e.log_type == t).count();
    assert_eq!(count(LogType::Error), 2);
    assert_eq!(count(LogType::Warning), 1);

    // A skipped step does not stop the run.
    assert_eq!(keyword_calls.load(Ordering::SeqCst), 1);
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_different_source_tries_every_registered_source() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::from_config(&Config::default(), None, Arc::new(InMemoryStore::new()))
        .with_step(PipelineStep::new(
            "scrape_articles",
            recording_action("source", seen.clone(), scraped(10, 0)),
        ));

    let run = orchestrator.run(TOPIC).await;
    let result = run.result("scrape_articles").unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        [
            Some("direct_fetch".to_string()),
            Some("readability_proxy".to_string()),
            Some("archive_snapshot".to_string()),
        ]
    );
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.status, StepStatus::Skipped);
}

#[tokio::test]
async fn test_sources_from_config_replace_defaults() {
    let mut config = Config::default();
    config.sources.insert(
        "scrape_articles".to_string(),
        vec!["primary".to_string(), "mirror".to_string()],
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::from_config(&config, None, Arc::new(InMemoryStore::new()))
        .with_step(PipelineStep::new(
            "scrape_articles",
            recording_action("source", seen.clone(), scraped(10, 1)),
        ));

    let run = orchestrator.run(TOPIC).await;

    assert_eq!(
        *seen.lock().unwrap(),
        [Some("primary".to_string()), Some("mirror".to_string())]
    );
    assert_eq!(run.result("scrape_articles").unwrap().retry_count, 1);
}

#[tokio::test]
async fn test_ai_select_follows_reasoning_choice() {
    let reasoning = Arc::new(MockReasoning::new().with_reply(
        TaskKind::StrategySelection,
        r#"```json
{"strategy": "broader_query", "rationale": "topic is too narrow"}
```"#,
    ));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let attempts = Arc::new(AtomicU32::new(0));
    let action = {
        let seen = seen.clone();
        let attempts = attempts.clone();
        action_fn(move |input, _ctx| {
            let seen = seen.clone();
            let attempts = attempts.clone();
            async move {
                seen.lock()
                    .unwrap()
                    .push(input.get("query").and_then(Value::as_str).map(str::to_string));
                let sections: Vec<String> = if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Vec::new()
                } else {
                    vec!["context".into(), "actors".into(), "outlook".into()]
                };
                Ok(json!({ "kind": "analysis", "data": { "sections": sections, "word_count": 450 } }))
            }
        })
    };

    let orchestrator = Orchestrator::from_config(
        &Config::default(),
        Some(reasoning.clone() as Arc<dyn ReasoningCapability>),
        Arc::new(InMemoryStore::new()),
    )
    .with_step(PipelineStep::new("analyze_topic", action));

    let run = orchestrator.run(TOPIC).await;
    let result = run.result("analyze_topic").unwrap();

    assert_eq!(result.status, StepStatus::Success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(*seen.lock().unwrap(), [None, Some("Sudan Civil".to_string())]);
    assert_eq!(reasoning.calls_for(TaskKind::StrategySelection), 1);
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_failure_threshold_raises_one_suggestion_across_runs() {
    let reasoning = Arc::new(MockReasoning::new().with_suggestions());
    let store = Arc::new(InMemoryStore::new());
    let mut config = Config::default();
    config.steps.insert(
        "search_videos".to_string(),
        StepRetryConfig::new(StrategyKind::BroaderQuery, 0, true),
    );

    let orchestrator = Orchestrator::from_config(
        &config,
        Some(reasoning.clone() as Arc<dyn ReasoningCapability>),
        store.clone(),
    )
    .with_step(PipelineStep::new(
        "search_videos",
        constant_action(search_results(0), Arc::new(AtomicU32::new(0))),
    ));

    let mut per_run = Vec::new();
    for _ in 0..4 {
        per_run.push(orchestrator.run(TOPIC).await.suggestions.len());
    }

    assert_eq!(per_run, [0, 0, 1, 0]);
    assert_eq!(reasoning.calls_for(TaskKind::FailureAnalysis), 1);
    let stored = store.suggestions().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].step_name, "search_videos");
    assert_eq!(stored[0].title, "Add a second news provider");

    let analysis = orchestrator
        .shared_tracker()
        .unwrap()
        .analysis("search_videos")
        .await
        .unwrap();
    assert_eq!(analysis.failure_count, 4);
    assert_eq!(analysis.total_outcomes, 4);
}

#[tokio::test]
async fn test_cancel_keeps_history_and_refuses_new_success() {
    common::setup_test_logging();
    let store = Arc::new(InMemoryStore::new());
    let started = Arc::new(AtomicBool::new(false));
    let waiting = {
        let started = started.clone();
        action_fn(move |_input, ctx| {
            let started = started.clone();
            async move {
                started.store(true, Ordering::SeqCst);
                ctx.cancellation().cancelled().await;
                Ok(search_results(9))
            }
        })
    };

    let orchestrator = Arc::new(
        Orchestrator::from_config(&Config::default(), None, store.clone())
            .with_step(PipelineStep::new(
                "generate_keywords",
                constant_action(keywords(8), Arc::new(AtomicU32::new(0))),
            ))
            .with_step(PipelineStep::new("search_news", waiting))
            .with_step(PipelineStep::new(
                "scrape_articles",
                constant_action(scraped(4, 4), Arc::new(AtomicU32::new(0))),
            )),
    );

    let handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(TOPIC).await })
    };

    let flag = started.clone();
    assert!(
        common::wait_for(
            || {
                let flag = flag.clone();
                async move { flag.load(Ordering::SeqCst) }
            },
            2_000
        )
        .await
    );
    let run_id = orchestrator.active_runs().await[0];
    let before = store.entries(run_id).await;

    assert!(orchestrator.cancel(run_id).await);
    assert!(!orchestrator.cancel(run_id).await);

    let run = handle.await.unwrap();
    assert_eq!(run.run_id, run_id);
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.result("generate_keywords").unwrap().status, StepStatus::Success);
    assert_eq!(run.result("search_news").unwrap().status, StepStatus::Cancelled);
    assert!(run.result("search_news").unwrap().decision.is_none());
    assert!(run.result("scrape_articles").is_none());

    let after = store.entries(run_id).await;
    assert_eq!(&after[..before.len()], &before[..]);
    assert!(after[before.len()..]
        .iter()
        .all(|e| e.log_type != LogType::Success));
    assert_eq!(
        store.status_history(run_id).await,
        [RunStatus::Running, RunStatus::Cancelled]
    );
}

#[tokio::test]
async fn test_jsonl_store_receives_every_entry_and_status() {
    let dir = common::temp_dir();
    let store = Arc::new(JsonlStore::open(dir.path()).await.unwrap());
    let orchestrator = Orchestrator::from_config(&Config::default(), None, store.clone())
        .with_step(PipelineStep::new(
            "generate_keywords",
            constant_action(keywords(3), Arc::new(AtomicU32::new(0))),
        ));

    let run = orchestrator.run(TOPIC).await;
    let records = store.read_run(run.run_id).await.unwrap();

    let entries: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            RunRecord::Entry { entry } => Some(entry.clone()),
            RunRecord::Status { .. } => None,
        })
        .collect();
    assert_eq!(entries, run.log.entries().await);

    let statuses: Vec<RunStatus> = records
        .iter()
        .filter_map(|r| match r {
            RunRecord::Status { status, .. } => Some(*status),
            RunRecord::Entry { .. } => None,
        })
        .collect();
    assert_eq!(statuses, [RunStatus::Running, RunStatus::Completed]);
}

#[tokio::test]
async fn test_summary_counts_attempt_targets() {
    let action = action_fn(|_input, ctx| async move {
        let first = ctx.begin_attempt("primary-model").await;
        ctx.finish_attempt(first, None, Some(pipewright::domain::models::AttemptError::from_message("HTTP 429")))
            .await;
        let second = ctx.begin_attempt("secondary-model").await;
        ctx.finish_attempt(second, None, None).await;
        Ok(keywords(5))
    });
    let orchestrator = Orchestrator::from_config(&Config::default(), None, Arc::new(InMemoryStore::new()))
        .with_step(PipelineStep::new("generate_keywords", action));

    let run = orchestrator.run(TOPIC).await;

    assert_eq!(run.summary.succeeded_targets, ["secondary-model"]);
    assert_eq!(run.summary.failed_targets, ["primary-model"]);
    let record = run.log.step("generate_keywords").await.unwrap();
    let outcomes: HashMap<_, _> = record
        .attempts
        .iter()
        .map(|a| (a.target.as_str(), a.success))
        .collect();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes["secondary-model"]);
}
