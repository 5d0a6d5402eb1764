//! Validated raw output shapes of the research pipeline steps.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{PipelineError, PipelineResult};

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Raw output of a step, checked once at the boundary.
///
/// Wire shape is `{"kind": "<variant>", "data": ...}`; anything else is
/// rejected by [`RawStepOutput::from_value`] so evaluators never have to
/// guard for missing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RawStepOutput {
    Keywords(Vec<String>),
    SearchResults(Vec<SearchHit>),
    Scraped { attempted: usize, succeeded: usize },
    Summaries { attempted: usize, succeeded: usize },
    Transcripts { attempted: usize, succeeded: usize },
    Classified { total: usize, classified: usize },
    Analysis { sections: Vec<String>, word_count: usize },
}

impl RawStepOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Keywords(_) => "keywords",
            Self::SearchResults(_) => "search_results",
            Self::Scraped { .. } => "scraped",
            Self::Summaries { .. } => "summaries",
            Self::Transcripts { .. } => "transcripts",
            Self::Classified { .. } => "classified",
            Self::Analysis { .. } => "analysis",
        }
    }

    /// Validate an untyped step output.
    pub fn from_value(step: &str, value: serde_json::Value) -> PipelineResult<Self> {
        let output: Self =
            serde_json::from_value(value).map_err(|e| PipelineError::InvalidOutput {
                step: step.to_string(),
                reason: e.to_string(),
            })?;
        output.check_counts(step)?;
        Ok(output)
    }

    fn check_counts(&self, step: &str) -> PipelineResult<()> {
        let (done, of) = match self {
            Self::Scraped {
                attempted,
                succeeded,
            }
            | Self::Summaries {
                attempted,
                succeeded,
            }
            | Self::Transcripts {
                attempted,
                succeeded,
            } => (*succeeded, *attempted),
            Self::Classified { total, classified } => (*classified, *total),
            _ => return Ok(()),
        };
        if done > of {
            return Err(PipelineError::InvalidOutput {
                step: step.to_string(),
                reason: format!("{done} succeeded out of {of} attempted"),
            });
        }
        Ok(())
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
