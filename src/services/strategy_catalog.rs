//! Per-step retry configuration, alternatives, sources and dependencies.

use std::collections::HashMap;

use super::dependency_graph::StepDependencyGraph;
use crate::domain::models::{Config, FallbackBehavior, StepRetryConfig, StrategyKind};

/// Step names of the built-in research pipeline.
pub mod research_steps {
    pub const GENERATE_KEYWORDS: &str = "generate_keywords";
    pub const SEARCH_NEWS: &str = "search_news";
    pub const SCRAPE_ARTICLES: &str = "scrape_articles";
    pub const SEARCH_VIDEOS: &str = "search_videos";
    pub const TRANSCRIBE_VIDEOS: &str = "transcribe_videos";
    pub const SUMMARIZE_ARTICLES: &str = "summarize_articles";
    pub const CLASSIFY_CONTENT: &str = "classify_content";
    pub const ANALYZE_TOPIC: &str = "analyze_topic";

    /// Execution order of the research pipeline.
    pub const ORDER: [&str; 8] = [
        GENERATE_KEYWORDS,
        SEARCH_NEWS,
        SCRAPE_ARTICLES,
        SEARCH_VIDEOS,
        TRANSCRIBE_VIDEOS,
        SUMMARIZE_ARTICLES,
        CLASSIFY_CONTENT,
        ANALYZE_TOPIC,
    ];
}

/// Everything the retry strategy engine knows about the registered steps.
#[derive(Debug, Clone, Default)]
pub struct StrategyCatalog {
    steps: HashMap<String, StepRetryConfig>,
    alternatives: HashMap<String, Vec<String>>,
    sources: HashMap<String, Vec<String>>,
    graph: StepDependencyGraph,
}

impl StrategyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog for the built-in research pipeline.
    pub fn research_defaults() -> Self {
        use research_steps::*;

        Self::new()
            .with_step(
                GENERATE_KEYWORDS,
                StepRetryConfig::new(StrategyKind::AlternativeFunction, 2, false),
            )
            .with_step(
                SEARCH_NEWS,
                StepRetryConfig::new(StrategyKind::BroaderQuery, 3, false),
            )
            .with_step(
                SCRAPE_ARTICLES,
                StepRetryConfig::new(StrategyKind::DifferentSource, 2, true),
            )
            .with_step(
                SEARCH_VIDEOS,
                StepRetryConfig::new(StrategyKind::BroaderQuery, 2, true),
            )
            .with_step(
                TRANSCRIBE_VIDEOS,
                StepRetryConfig::new(StrategyKind::AlternativeFunction, 2, true),
            )
            .with_step(
                SUMMARIZE_ARTICLES,
                StepRetryConfig::new(StrategyKind::AlternativeFunction, 2, false)
                    .with_fallback_behavior(FallbackBehavior::UsePartial),
            )
            .with_step(
                CLASSIFY_CONTENT,
                StepRetryConfig::new(StrategyKind::RerunEarlierStep, 1, true),
            )
            .with_step(
                ANALYZE_TOPIC,
                StepRetryConfig::new(StrategyKind::AiSelect, 2, false)
                    .with_fallback_behavior(FallbackBehavior::UseDefault),
            )
            .with_alternatives(
                GENERATE_KEYWORDS,
                ["keywords_secondary_model", "keywords_heuristic"],
            )
            .with_alternatives(
                TRANSCRIBE_VIDEOS,
                ["transcribe_captions", "transcribe_speech_model"],
            )
            .with_alternatives(
                SUMMARIZE_ARTICLES,
                ["summarize_secondary_model", "summarize_extractive"],
            )
            .with_sources(
                SCRAPE_ARTICLES,
                ["direct_fetch", "readability_proxy", "archive_snapshot"],
            )
            .with_sources(SEARCH_NEWS, ["news_api", "gdelt"])
            .with_dependencies(SEARCH_NEWS, [GENERATE_KEYWORDS])
            .with_dependencies(SCRAPE_ARTICLES, [SEARCH_NEWS])
            .with_dependencies(SEARCH_VIDEOS, [GENERATE_KEYWORDS])
            .with_dependencies(TRANSCRIBE_VIDEOS, [SEARCH_VIDEOS])
            .with_dependencies(SUMMARIZE_ARTICLES, [SCRAPE_ARTICLES])
            .with_dependencies(CLASSIFY_CONTENT, [SUMMARIZE_ARTICLES, TRANSCRIBE_VIDEOS])
            .with_dependencies(ANALYZE_TOPIC, [CLASSIFY_CONTENT])
    }

    /// Research defaults with the configuration's entries laid over them.
    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::research_defaults();
        for (step, retry) in &config.steps {
            catalog.steps.insert(step.clone(), retry.clone());
        }
        for (step, alternatives) in &config.alternatives {
            catalog
                .alternatives
                .insert(step.clone(), alternatives.clone());
        }
        for (step, sources) in &config.sources {
            catalog.sources.insert(step.clone(), sources.clone());
        }
        for (step, upstream) in &config.dependencies {
            catalog.graph.set_upstream(step.clone(), upstream.clone());
        }
        catalog
    }

    pub fn with_step(mut self, name: impl Into<String>, config: StepRetryConfig) -> Self {
        self.steps.insert(name.into(), config);
        self
    }

    pub fn with_alternatives<I, S>(mut self, step: impl Into<String>, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives.insert(
            step.into(),
            alternatives.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_sources<I, S>(mut self, step: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources
            .insert(step.into(), sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dependencies<I, S>(mut self, step: impl Into<String>, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graph.set_upstream(step, upstream);
        self
    }

    /// Retry configuration for a step; unknown steps get the skip default.
    pub fn config_for(&self, step: &str) -> StepRetryConfig {
        self.steps.get(step).cloned().unwrap_or_default()
    }

    pub fn is_registered(&self, step: &str) -> bool {
        self.steps.contains_key(step)
    }

    pub fn alternatives_for(&self, step: &str) -> &[String] {
        self.alternatives.get(step).map_or(&[], Vec::as_slice)
    }

    pub fn sources_for(&self, step: &str) -> &[String] {
        self.sources.get(step).map_or(&[], Vec::as_slice)
    }

    pub fn graph(&self) -> &StepDependencyGraph {
        &self.graph
    }

    /// Registered step names, sorted.
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.keys().cloned().collect();
        names.sort();
        names
    }
}
