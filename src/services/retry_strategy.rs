//! Retry strategy engine.
//!
//! Each strategy is one [`RetryStrategy`] implementation, registered in a
//! table keyed by [`StrategyKind`]. A new strategy is a new impl plus one
//! `register` call.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use super::strategy_catalog::StrategyCatalog;
use super::structured_output::parse_structured;
use crate::domain::models::{RetryContext, RetryModification, StepEvaluation, StepInput, StrategyKind};
use crate::domain::ports::{ChatMessage, ReasoningCapability, TaskKind};

/// Suffix appended by the last broader-query transform.
pub const BROADER_QUERY_SUFFIX: &str = "news";

/// Number of broader-query transforms.
const BROADER_QUERY_TRANSFORMS: u32 = 3;

/// Order in which `ai_select` lists the concrete options.
const SELECTABLE: [StrategyKind; 6] = [
    StrategyKind::BroaderQuery,
    StrategyKind::AlternativeFunction,
    StrategyKind::DifferentSource,
    StrategyKind::RerunEarlierStep,
    StrategyKind::FallbackData,
    StrategyKind::Skip,
];

/// A named way of changing what the next attempt does.
#[async_trait]
pub trait RetryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether this strategy has anything left to offer for `ctx`.
    fn is_available(&self, _ctx: &RetryContext, _catalog: &StrategyCatalog) -> bool {
        true
    }

    async fn modify(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> RetryModification;
}

fn input_of(pairs: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> StepInput {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Simplify `topic` for retry number `retry_count` (0-based).
///
/// 0: first two words, 1: first word, 2 and later: first word plus
/// [`BROADER_QUERY_SUFFIX`]. `None` when the topic has no words.
pub fn broaden_query(topic: &str, retry_count: u32) -> Option<String> {
    let words: Vec<&str> = topic.split_whitespace().collect();
    let first = *words.first()?;
    let index = retry_count.min(BROADER_QUERY_TRANSFORMS - 1);
    Some(match index {
        0 => words.iter().take(2).copied().collect::<Vec<_>>().join(" "),
        1 => first.to_string(),
        _ => format!("{first} {BROADER_QUERY_SUFFIX}"),
    })
}

pub struct BroaderQuery;

#[async_trait]
impl RetryStrategy for BroaderQuery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BroaderQuery
    }

    fn is_available(&self, ctx: &RetryContext, _catalog: &StrategyCatalog) -> bool {
        !ctx.topic.trim().is_empty()
    }

    async fn modify(&self, ctx: &RetryContext, _catalog: &StrategyCatalog) -> RetryModification {
        match broaden_query(&ctx.topic, ctx.retry_count) {
            Some(query) => RetryModification::retry(
                self.kind(),
                format!("broadening query from '{}' to '{query}'", ctx.topic),
                input_of([
                    ("query", json!(query)),
                    ("original_query", json!(ctx.topic)),
                ]),
            ),
            None => RetryModification::stop(self.kind(), "topic has no words to broaden"),
        }
    }
}

pub struct AlternativeFunction;

#[async_trait]
impl RetryStrategy for AlternativeFunction {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AlternativeFunction
    }

    fn is_available(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> bool {
        (ctx.retry_count as usize) < catalog.alternatives_for(&ctx.step_name).len()
    }

    async fn modify(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> RetryModification {
        let alternatives = catalog.alternatives_for(&ctx.step_name);
        let Some(implementation) = alternatives.get(ctx.retry_count as usize) else {
            return RetryModification::stop(
                self.kind(),
                format!(
                    "all {} alternative implementations of '{}' have been tried",
                    alternatives.len(),
                    ctx.step_name
                ),
            );
        };
        let mut modification = RetryModification::retry(
            self.kind(),
            format!(
                "switching '{}' to alternative implementation '{implementation}'",
                ctx.step_name
            ),
            input_of([("implementation", json!(implementation))]),
        );
        modification.alternative_implementation = Some(implementation.clone());
        modification
    }
}

/// Picks the next data source. `sources[0]` is the one the initial attempt
/// used, so retry `k` (1-based) reads `sources[min(k, len-1)]` and the list
/// is exhausted once `k` runs past its end.
pub struct DifferentSource;

#[async_trait]
impl RetryStrategy for DifferentSource {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DifferentSource
    }

    fn is_available(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> bool {
        (ctx.retry_count as usize + 1) < catalog.sources_for(&ctx.step_name).len()
    }

    async fn modify(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> RetryModification {
        let sources = catalog.sources_for(&ctx.step_name);
        let Some(last) = sources.len().checked_sub(1) else {
            return RetryModification::stop(
                self.kind(),
                format!("no data sources registered for '{}'", ctx.step_name),
            );
        };
        let next = ctx.retry_count as usize + 1;
        if next > last {
            return RetryModification::stop(
                self.kind(),
                format!(
                    "last data source '{}' for '{}' already tried",
                    sources[last], ctx.step_name
                ),
            );
        }
        let source = &sources[next.min(last)];
        RetryModification::retry(
            self.kind(),
            format!("switching '{}' to data source '{source}'", ctx.step_name),
            input_of([("source", json!(source))]),
        )
    }
}

pub struct RerunEarlierStep;

impl RerunEarlierStep {
    fn weak_upstream<'a>(
        ctx: &'a RetryContext,
        catalog: &'a StrategyCatalog,
    ) -> Option<(&'a str, &'a StepEvaluation)> {
        ctx.previous_step_results
            .as_ref()
            .and_then(|results| catalog.graph().weak_upstream(&ctx.step_name, results))
    }
}

#[async_trait]
impl RetryStrategy for RerunEarlierStep {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RerunEarlierStep
    }

    fn is_available(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> bool {
        Self::weak_upstream(ctx, catalog).is_some()
    }

    async fn modify(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> RetryModification {
        let Some((upstream, evaluation)) = Self::weak_upstream(ctx, catalog) else {
            return RetryModification::stop(
                self.kind(),
                format!("no weak upstream step found for '{}'", ctx.step_name),
            );
        };
        let mut modification = RetryModification::retry(
            self.kind(),
            format!(
                "'{upstream}' produced {} output ({}); re-running it may give '{}' enough input",
                evaluation.quality,
                evaluation.issue_or_default(),
                ctx.step_name
            ),
            StepInput::new(),
        );
        modification.rerun_step = Some(upstream.to_string());
        modification
    }
}

pub struct FallbackData;

#[async_trait]
impl RetryStrategy for FallbackData {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FallbackData
    }

    async fn modify(&self, ctx: &RetryContext, _catalog: &StrategyCatalog) -> RetryModification {
        RetryModification::stop(
            self.kind(),
            format!("use default/cached value for '{}'", ctx.step_name),
        )
    }
}

pub struct Skip;

#[async_trait]
impl RetryStrategy for Skip {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Skip
    }

    async fn modify(&self, ctx: &RetryContext, _catalog: &StrategyCatalog) -> RetryModification {
        RetryModification::stop(
            self.kind(),
            format!("omit '{}' contribution", ctx.step_name),
        )
    }
}

pub struct NoStrategy;

#[async_trait]
impl RetryStrategy for NoStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::None
    }

    fn is_available(&self, _ctx: &RetryContext, _catalog: &StrategyCatalog) -> bool {
        false
    }

    async fn modify(&self, ctx: &RetryContext, _catalog: &StrategyCatalog) -> RetryModification {
        RetryModification::stop(
            self.kind(),
            format!("no retry strategy configured for '{}'", ctx.step_name),
        )
    }
}

/// Schema the reasoning capability must follow for strategy selection.
#[derive(Debug, Deserialize)]
struct StrategyChoice {
    strategy: String,
    #[serde(default)]
    rationale: String,
}

/// Delegates the choice of strategy to the reasoning capability, constrained
/// to the strategies that can actually do something for this step.
pub struct AiSelect {
    reasoning: Option<Arc<dyn ReasoningCapability>>,
    temperature: f32,
    concrete: HashMap<StrategyKind, Arc<dyn RetryStrategy>>,
}

impl AiSelect {
    fn options(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> Vec<StrategyKind> {
        SELECTABLE
            .into_iter()
            .filter(|kind| {
                self.concrete
                    .get(kind)
                    .is_some_and(|s| s.is_available(ctx, catalog))
            })
            .collect()
    }

    fn prompt(ctx: &RetryContext, catalog: &StrategyCatalog, options: &[StrategyKind]) -> Vec<ChatMessage> {
        let metrics: BTreeMap<&str, String> = ctx
            .evaluation
            .metrics
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_string()))
            .collect();
        let details = json!({
            "step": ctx.step_name,
            "topic": ctx.topic,
            "quality": ctx.evaluation.quality,
            "issue": ctx.evaluation.issue,
            "metrics": metrics,
            "retry_count": ctx.retry_count,
            "max_retries": ctx.max_retries,
            "available_strategies": options.iter().map(StrategyKind::as_str).collect::<Vec<_>>(),
            "alternatives": catalog.alternatives_for(&ctx.step_name),
            "sources": catalog.sources_for(&ctx.step_name),
            "rerun_targets": catalog.graph().upstream_of(&ctx.step_name),
        });
        vec![
            ChatMessage::system(
                "You choose how a research pipeline recovers from a weak step result. \
                 Reply with one JSON object: {\"strategy\": <one of available_strategies>, \
                 \"rationale\": <one sentence>}.",
            ),
            ChatMessage::user(details.to_string()),
        ]
    }

    async fn choose(
        &self,
        ctx: &RetryContext,
        catalog: &StrategyCatalog,
        options: &[StrategyKind],
    ) -> Result<(StrategyKind, String), String> {
        let reasoning = self
            .reasoning
            .as_ref()
            .ok_or_else(|| "no reasoning capability configured".to_string())?;
        let raw = reasoning
            .call(
                TaskKind::StrategySelection,
                &Self::prompt(ctx, catalog, options),
                self.temperature,
                true,
            )
            .await
            .map_err(|e| e.to_string())?;
        let choice: StrategyChoice = parse_structured(&raw).map_err(|e| e.to_string())?;
        let kind: StrategyKind = choice.strategy.parse()?;
        if !options.contains(&kind) {
            return Err(format!("'{kind}' is not available for '{}'", ctx.step_name));
        }
        Ok((kind, choice.rationale))
    }
}

#[async_trait]
impl RetryStrategy for AiSelect {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AiSelect
    }

    fn is_available(&self, _ctx: &RetryContext, _catalog: &StrategyCatalog) -> bool {
        false
    }

    async fn modify(&self, ctx: &RetryContext, catalog: &StrategyCatalog) -> RetryModification {
        let options = self.options(ctx, catalog);
        let Some(&first) = options.first() else {
            return RetryModification::stop(self.kind(), "no strategies available to select from");
        };

        let (kind, prefix) = match self.choose(ctx, catalog, &options).await {
            Ok((kind, rationale)) => {
                debug!(step = %ctx.step_name, strategy = %kind, "AI selected retry strategy");
                (kind, format!("AI selected {kind}: {rationale}"))
            }
            Err(reason) => {
                warn!(step = %ctx.step_name, error = %reason, "AI strategy selection unavailable");
                (first, format!("AI selection unavailable ({reason}); defaulting to {first}"))
            }
        };

        let Some(strategy) = self.concrete.get(&kind) else {
            return RetryModification::stop(self.kind(), format!("{kind} is not registered"));
        };
        let mut modification = strategy.modify(ctx, catalog).await;
        modification.reason = format!("{prefix}; {}", modification.reason);
        modification
    }
}

/// Maps a failed or partial evaluation plus a configured strategy to a
/// [`RetryModification`].
pub struct RetryStrategyEngine {
    catalog: Arc<StrategyCatalog>,
    strategies: HashMap<StrategyKind, Arc<dyn RetryStrategy>>,
}

impl RetryStrategyEngine {
    /// Engine without a reasoning capability; `ai_select` takes the first
    /// available option.
    pub fn new(catalog: StrategyCatalog) -> Self {
        Self::with_reasoning(catalog, None, 0.3)
    }

    pub fn with_reasoning(
        catalog: StrategyCatalog,
        reasoning: Option<Arc<dyn ReasoningCapability>>,
        temperature: f32,
    ) -> Self {
        let concrete: Vec<Arc<dyn RetryStrategy>> = vec![
            Arc::new(BroaderQuery),
            Arc::new(AlternativeFunction),
            Arc::new(DifferentSource),
            Arc::new(RerunEarlierStep),
            Arc::new(FallbackData),
            Arc::new(Skip),
            Arc::new(NoStrategy),
        ];
        let concrete: HashMap<StrategyKind, Arc<dyn RetryStrategy>> =
            concrete.into_iter().map(|s| (s.kind(), s)).collect();

        let mut strategies = concrete.clone();
        strategies.insert(
            StrategyKind::AiSelect,
            Arc::new(AiSelect {
                reasoning,
                temperature,
                concrete,
            }),
        );

        Self {
            catalog: Arc::new(catalog),
            strategies,
        }
    }

    /// Add or replace a strategy implementation.
    pub fn register(&mut self, strategy: Arc<dyn RetryStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn catalog(&self) -> &StrategyCatalog {
        &self.catalog
    }

    pub async fn get_retry_strategy(
        &self,
        kind: StrategyKind,
        ctx: &RetryContext,
    ) -> RetryModification {
        let modification = match self.strategies.get(&kind) {
            Some(strategy) => strategy.modify(ctx, &self.catalog).await,
            None => RetryModification::stop(kind, format!("no implementation registered for {kind}")),
        };
        debug!(
            step = %ctx.step_name,
            strategy = %kind,
            retry_count = ctx.retry_count,
            should_retry = modification.should_retry,
            "retry strategy resolved"
        );
        modification
    }

    /// Strategies that could do something for `ctx` right now.
    pub fn available_strategies(&self, ctx: &RetryContext) -> Vec<StrategyKind> {
        SELECTABLE
            .into_iter()
            .filter(|kind| {
                self.strategies
                    .get(kind)
                    .is_some_and(|s| s.is_available(ctx, &self.catalog))
            })
            .collect()
    }
}
