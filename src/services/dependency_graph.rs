//! Static step dependency graph used for rerun recommendations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::models::StepEvaluation;

/// Read-only mapping `step -> [upstream steps]`, upstream lists in
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDependencyGraph {
    upstream: HashMap<String, Vec<String>>,
}

impl StepDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step<I, S>(mut self, step: impl Into<String>, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_upstream(step, upstream);
        self
    }

    /// Replace the upstream list of a step.
    pub fn set_upstream<I, S>(&mut self, step: impl Into<String>, upstream: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.upstream
            .insert(step.into(), upstream.into_iter().map(Into::into).collect());
    }

    pub fn upstream_of(&self, step: &str) -> &[String] {
        self.upstream.get(step).map_or(&[], Vec::as_slice)
    }

    /// First upstream step whose recorded quality is `partial` or `empty`.
    pub fn weak_upstream<'a>(
        &'a self,
        step: &str,
        results: &'a BTreeMap<String, StepEvaluation>,
    ) -> Option<(&'a str, &'a StepEvaluation)> {
        self.upstream_of(step).iter().find_map(|up| {
            results
                .get(up)
                .filter(|eval| eval.quality.is_weak())
                .map(|eval| (up.as_str(), eval))
        })
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.upstream.keys().map(String::as_str)
    }

    /// Detect a dependency cycle, returning the steps on it (first step repeated at the end).
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut done: HashSet<&str> = HashSet::new();
        let mut names: Vec<&str> = self.steps().collect();
        names.sort_unstable();

        for start in names {
            let mut path: Vec<&str> = Vec::new();
            if let Some(cycle) = self.visit(start, &mut path, &mut done) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        step: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|s| *s == step) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(step.to_string());
            return Some(cycle);
        }
        if done.contains(step) {
            return None;
        }
        path.push(step);
        for up in self.upstream_of(step) {
            if let Some(cycle) = self.visit(up, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(step);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> StepDependencyGraph {
        StepDependencyGraph::new()
            .with_step("classify_content", ["summarize_articles", "transcribe_videos"])
            .with_step("summarize_articles", ["scrape_articles"])
    }

    #[test]
    fn test_unknown_step_has_no_upstream() {
        assert!(graph().upstream_of("generate_keywords").is_empty());
    }

    #[test]
    fn test_weak_upstream_in_declaration_order() {
        let mut results = BTreeMap::new();
        results.insert("summarize_articles".to_string(), StepEvaluation::good());
        results.insert(
            "transcribe_videos".to_string(),
            StepEvaluation::empty("no captions"),
        );
        let graph = graph();
        let (step, eval) = graph.weak_upstream("classify_content", &results).unwrap();
        assert_eq!(step, "transcribe_videos");
        assert_eq!(eval.issue.as_deref(), Some("no captions"));
    }

    #[test]
    fn test_error_upstream_is_not_weak() {
        let mut results = BTreeMap::new();
        results.insert(
            "summarize_articles".to_string(),
            StepEvaluation::error("boom"),
        );
        assert!(graph().weak_upstream("classify_content", &results).is_none());
    }

    #[test]
    fn test_find_cycle() {
        assert!(graph().find_cycle().is_none());

        let cyclic = graph().with_step("scrape_articles", ["classify_content"]);
        let cycle = cyclic.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"scrape_articles".to_string()));
    }
}
