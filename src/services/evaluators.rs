//! Step evaluator set.
//!
//! Pure functions from a step's raw output to a [`StepEvaluation`]. They hold
//! no state and do no I/O, so they can be called concurrently and repeatedly
//! with identical results.

use crate::domain::models::{Quality, RawStepOutput, SearchHit, StepEvaluation};

/// Success rate at or above which a fan-out step is `good`.
pub const GOOD_RATE: f64 = 0.80;
/// Success rate at or above which a fan-out step is `partial` (if anything succeeded).
pub const PARTIAL_RATE: f64 = 0.40;

pub const KEYWORDS_GOOD: usize = 5;
pub const KEYWORDS_PARTIAL: usize = 3;
pub const SEARCH_GOOD: usize = 5;
pub const SEARCH_PARTIAL: usize = 1;
pub const ANALYSIS_GOOD_SECTIONS: usize = 3;
pub const ANALYSIS_GOOD_WORDS: usize = 300;

/// Shared banding for percentage-based evaluators.
pub fn band_by_rate(succeeded: usize, attempted: usize) -> Quality {
    if attempted == 0 || succeeded == 0 {
        return Quality::Empty;
    }
    let rate = ratio(succeeded, attempted);
    if rate >= GOOD_RATE {
        Quality::Good
    } else if rate >= PARTIAL_RATE {
        Quality::Partial
    } else {
        Quality::Empty
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(succeeded: usize, attempted: usize) -> f64 {
    succeeded as f64 / attempted as f64
}

fn percent(succeeded: usize, attempted: usize) -> f64 {
    if attempted == 0 {
        return 0.0;
    }
    (ratio(succeeded, attempted) * 1000.0).round() / 10.0
}

/// Count-ladder evaluator shared by keyword and search steps.
fn evaluate_count(label: &str, count: usize, good: usize, partial: usize) -> StepEvaluation {
    let evaluation = if count >= good {
        StepEvaluation::good()
    } else if count >= partial {
        StepEvaluation::partial(format!("only {count} {label} (need {good} for good quality)"))
    } else {
        StepEvaluation::empty(format!("no usable {label} (found {count}, need {partial})"))
    };
    evaluation
        .with_metric("count", count)
        .with_metric("threshold_good", good)
        .with_metric("threshold_partial", partial)
}

pub fn evaluate_keywords(keywords: &[String]) -> StepEvaluation {
    let count = keywords.iter().filter(|k| !k.trim().is_empty()).count();
    evaluate_count("keywords", count, KEYWORDS_GOOD, KEYWORDS_PARTIAL)
}

pub fn evaluate_search_results(hits: &[SearchHit]) -> StepEvaluation {
    let count = hits
        .iter()
        .filter(|h| h.url.as_deref().is_some_and(|u| !u.trim().is_empty()))
        .count();
    evaluate_count("search results", count, SEARCH_GOOD, SEARCH_PARTIAL)
        .with_metric("returned", hits.len())
}

/// Banded evaluator for steps that fan out over many items.
pub fn evaluate_rate(label: &str, succeeded: usize, attempted: usize) -> StepEvaluation {
    let pct = percent(succeeded, attempted);
    let evaluation = match band_by_rate(succeeded, attempted) {
        Quality::Good => StepEvaluation::good(),
        Quality::Partial => StepEvaluation::partial(format!(
            "{label}: {succeeded}/{attempted} succeeded ({pct}%)"
        )),
        _ if attempted == 0 => StepEvaluation::empty(format!("{label}: nothing to process")),
        _ => StepEvaluation::empty(format!(
            "{label}: {succeeded}/{attempted} succeeded ({pct}%)"
        )),
    };
    evaluation
        .with_metric("attempted", attempted)
        .with_metric("succeeded", succeeded)
        .with_metric("success_rate", pct)
}

pub fn evaluate_analysis(sections: &[String], word_count: usize) -> StepEvaluation {
    let filled = sections.iter().filter(|s| !s.trim().is_empty()).count();
    let evaluation = if filled >= ANALYSIS_GOOD_SECTIONS && word_count >= ANALYSIS_GOOD_WORDS {
        StepEvaluation::good()
    } else if filled >= 1 {
        StepEvaluation::partial(format!(
            "analysis is thin: {filled} sections, {word_count} words"
        ))
    } else {
        StepEvaluation::empty("analysis produced no sections")
    };
    evaluation
        .with_metric("sections", filled)
        .with_metric("word_count", word_count)
}

/// Evaluate any step's validated output.
pub fn evaluate(step_name: &str, output: &RawStepOutput) -> StepEvaluation {
    let evaluation = match output {
        RawStepOutput::Keywords(keywords) => evaluate_keywords(keywords),
        RawStepOutput::SearchResults(hits) => evaluate_search_results(hits),
        RawStepOutput::Scraped {
            attempted,
            succeeded,
        } => evaluate_rate("scraped articles", *succeeded, *attempted),
        RawStepOutput::Summaries {
            attempted,
            succeeded,
        } => evaluate_rate("summaries", *succeeded, *attempted),
        RawStepOutput::Transcripts {
            attempted,
            succeeded,
        } => evaluate_rate("transcripts", *succeeded, *attempted),
        RawStepOutput::Classified { total, classified } => {
            evaluate_rate("classified items", *classified, *total)
        }
        RawStepOutput::Analysis {
            sections,
            word_count,
        } => evaluate_analysis(sections, *word_count),
    };
    label_issue(step_name, evaluation)
}

/// Evaluate an untyped output, validating its shape first.
///
/// A value that does not match any known shape is an `error`: the action
/// misbehaved, which is different from legitimately finding nothing.
pub fn evaluate_value(step_name: &str, value: &serde_json::Value) -> StepEvaluation {
    match RawStepOutput::from_value(step_name, value.clone()) {
        Ok(output) => evaluate(step_name, &output),
        Err(e) => StepEvaluation::error(e.to_string()),
    }
}

fn label_issue(step_name: &str, mut evaluation: StepEvaluation) -> StepEvaluation {
    if let Some(issue) = evaluation.issue.take() {
        evaluation.issue = Some(format!("{step_name}: {issue}"));
    }
    evaluation
}
