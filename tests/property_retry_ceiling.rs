//! Property-based tests for the retry ceiling, quality banding and evaluator
//! determinism.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pipewright::domain::models::{Quality, StepEvaluation, StepRetryConfig, StrategyKind};
use pipewright::services::evaluators::{band_by_rate, evaluate_value};
use pipewright::services::retry_strategy::broaden_query;
use pipewright::services::{
    action_fn, DecisionPolicy, PipelineLog, RetryStrategyEngine, RunScope, StepConfig, StepRunner,
    StrategyCatalog,
};

const STEP: &str = "prop_step";

fn strategy_kind() -> impl Strategy<Value = StrategyKind> {
    prop::sample::select(StrategyKind::ALL.to_vec())
}

/// 0 = empty, 1 = partial, 2 = good, 3 = action error
fn outcome_pattern() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, 1..8)
}

fn rank(quality: Quality) -> u8 {
    match quality {
        Quality::Error | Quality::Empty => 0,
        Quality::Partial => 1,
        Quality::Good => 2,
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

proptest! {
    #[test]
    fn prop_retry_count_never_exceeds_budget(
        kind in strategy_kind(),
        max_retries in 0u32..6,
        can_skip in any::<bool>(),
        pattern in outcome_pattern(),
    ) {
        let retry = StepRetryConfig::new(kind, max_retries, can_skip);
        let catalog = StrategyCatalog::new()
            .with_step(STEP, retry.clone())
            .with_sources(STEP, ["a", "b", "c"])
            .with_alternatives(STEP, ["x", "y"])
            .with_dependencies(STEP, ["upstream"]);
        let runner = StepRunner::new(Arc::new(DecisionPolicy::new(Arc::new(
            RetryStrategyEngine::new(catalog),
        ))));

        let calls = Arc::new(AtomicUsize::new(0));
        let action = {
            let calls = calls.clone();
            let pattern = pattern.clone();
            action_fn(move |_input, _ctx| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let outcome = pattern[n % pattern.len()];
                async move {
                    if outcome == 3 {
                        anyhow::bail!("scripted failure");
                    }
                    Ok(json!({ "q": outcome }))
                }
            })
        };
        let evaluator = |v: &Value| match v["q"].as_u64() {
            Some(2) => StepEvaluation::good(),
            Some(1) => StepEvaluation::partial("thin"),
            _ => StepEvaluation::empty("nothing"),
        };

        let log = Arc::new(PipelineLog::detached());
        let scope = RunScope::new("war in sudan", log.clone());
        let config = StepConfig::new(STEP, action, evaluator).with_retry(retry);

        let (result, retry_entries) = runtime().block_on(async {
            let result = runner.run_step(config, &scope).await;
            let retry_entries = log
                .entries_for(STEP)
                .await
                .iter()
                .filter(|e| e.message.starts_with("retrying ("))
                .count();
            (result, retry_entries)
        });

        prop_assert!(result.retry_count <= max_retries);
        prop_assert!(calls.load(Ordering::SeqCst) <= max_retries as usize + 1);
        prop_assert_eq!(retry_entries, result.retry_count as usize);
        prop_assert!(result.status.is_terminal());
        prop_assert!(result.decision.is_some());
    }

    #[test]
    fn prop_band_by_rate_is_monotonic(
        attempted in 1usize..200,
        a in 0usize..200,
        b in 0usize..200,
    ) {
        let low = a.min(b).min(attempted);
        let high = a.max(b).min(attempted);
        prop_assert!(rank(band_by_rate(low, attempted)) <= rank(band_by_rate(high, attempted)));
    }

    #[test]
    fn prop_band_never_good_without_successes(attempted in 0usize..200) {
        prop_assert_eq!(band_by_rate(0, attempted), Quality::Empty);
    }

    #[test]
    fn prop_evaluation_is_deterministic(
        count in 0usize..12,
        attempted in 0usize..30,
        succeeded in 0usize..30,
    ) {
        let outputs = [
            json!({ "kind": "keywords", "data": (0..count).map(|i| format!("k{i}")).collect::<Vec<_>>() }),
            json!({ "kind": "scraped", "data": { "attempted": attempted, "succeeded": succeeded } }),
            json!({ "kind": "mystery", "data": null }),
        ];
        for output in &outputs {
            prop_assert_eq!(evaluate_value(STEP, output), evaluate_value(STEP, output));
        }
    }

    #[test]
    fn prop_broader_query_only_shrinks_topic(
        words in prop::collection::vec("[a-z]{1,8}", 1..6),
        retry_count in 0u32..10,
    ) {
        let topic = words.join(" ");
        let query = broaden_query(&topic, retry_count).unwrap();
        prop_assert!(!query.is_empty());
        prop_assert!(query.starts_with(&words[0]));
        prop_assert!(query.split_whitespace().count() <= 2);
    }
}
