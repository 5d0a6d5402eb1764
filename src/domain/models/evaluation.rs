//! Step evaluation verdicts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Four-valued verdict an evaluator assigns to a step's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Output meets the step's minimum acceptable shape.
    Good,
    /// Non-empty but below threshold; processing continues.
    Partial,
    /// No usable output.
    Empty,
    /// The step action raised an error.
    Error,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Partial => "partial",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }

    /// Whether an upstream step with this quality is a candidate for a rerun.
    pub fn is_weak(&self) -> bool {
        matches!(self, Self::Partial | Self::Empty)
    }

    /// Whether output of this quality is usable downstream.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Good | Self::Partial)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single evaluation metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<usize> for MetricValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Result of evaluating one execution attempt of a step.
///
/// Metrics live in a `BTreeMap` so that two evaluations of the same output
/// compare and serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvaluation {
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, MetricValue>,
}

impl StepEvaluation {
    pub fn new(quality: Quality, issue: Option<String>) -> Self {
        Self {
            quality,
            issue,
            metrics: BTreeMap::new(),
        }
    }

    pub fn good() -> Self {
        Self::new(Quality::Good, None)
    }

    pub fn partial(issue: impl Into<String>) -> Self {
        Self::new(Quality::Partial, Some(issue.into()))
    }

    pub fn empty(issue: impl Into<String>) -> Self {
        Self::new(Quality::Empty, Some(issue.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Quality::Error, Some(message.into()))
    }

    /// Attach a metric, builder style.
    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    /// Issue text, or a placeholder for audit lines.
    pub fn issue_or_default(&self) -> &str {
        self.issue.as_deref().unwrap_or("no issue recorded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&Quality::Partial).unwrap(), "\"partial\"");
        let q: Quality = serde_json::from_str("\"empty\"").unwrap();
        assert_eq!(q, Quality::Empty);
    }

    #[test]
    fn test_weak_and_usable() {
        assert!(Quality::Partial.is_weak());
        assert!(Quality::Empty.is_weak());
        assert!(!Quality::Error.is_weak());
        assert!(Quality::Good.is_usable());
        assert!(!Quality::Empty.is_usable());
    }

    #[test]
    fn test_metric_value_untagged() {
        let eval = StepEvaluation::partial("few results")
            .with_metric("count", 2usize)
            .with_metric("source", "gdelt");
        let json = serde_json::to_value(&eval).unwrap();
        assert_eq!(json["metrics"]["count"], 2.0);
        assert_eq!(json["metrics"]["source"], "gdelt");
    }

    #[test]
    fn test_good_omits_issue_and_metrics() {
        let json = serde_json::to_value(StepEvaluation::good()).unwrap();
        assert!(json.get("issue").is_none());
        assert!(json.get("metrics").is_none());
    }
}
