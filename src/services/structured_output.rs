//! Parsing of structured reasoning output.
//!
//! The reasoning capability is asked for a single JSON document matching a
//! documented schema. Parsing tries that document as-is (after stripping a
//! markdown fence) and then falls back to one regex that pulls out the
//! outermost bracketed JSON value. There is no cascade of shape guesses.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructuredOutputError {
    #[error("Reasoning output was empty")]
    Empty,

    #[error("Reasoning output did not match the expected schema: {0}")]
    Schema(String),
}

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("fence pattern is valid")
    })
}

fn bracketed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)(\{.*\}|\[.*\])").expect("bracketed pattern is valid")
    })
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    fence_pattern()
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str())
}

/// Parse reasoning output into `T`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, StructuredOutputError> {
    let body = strip_fence(raw);
    if body.is_empty() {
        return Err(StructuredOutputError::Empty);
    }

    let direct_err = match serde_json::from_str::<T>(body) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let Some(candidate) = bracketed_pattern().find(body) else {
        return Err(StructuredOutputError::Schema(direct_err.to_string()));
    };
    serde_json::from_str::<T>(candidate.as_str())
        .map_err(|e| StructuredOutputError::Schema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Choice {
        strategy: String,
        rationale: String,
    }

    #[test]
    fn test_plain_json() {
        let choice: Choice =
            parse_structured(r#"{"strategy": "skip", "rationale": "nothing to find"}"#).unwrap();
        assert_eq!(choice.strategy, "skip");
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n{\"strategy\": \"broader_query\", \"rationale\": \"too narrow\"}\n```";
        let choice: Choice = parse_structured(raw).unwrap();
        assert_eq!(choice.strategy, "broader_query");
    }

    #[test]
    fn test_prose_wrapped_object_uses_fallback() {
        let raw = "Sure! Here is my answer: {\"strategy\": \"skip\", \"rationale\": \"r\"} Hope it helps.";
        let choice: Choice = parse_structured(raw).unwrap();
        assert_eq!(choice.rationale, "r");
    }

    #[test]
    fn test_prose_wrapped_array_uses_fallback() {
        let raw = "Keywords follow: [\"sudan\", \"khartoum\"] end";
        let words: Vec<String> = parse_structured(raw).unwrap();
        assert_eq!(words, vec!["sudan", "khartoum"]);
    }

    #[test]
    fn test_empty_and_garbage() {
        assert!(matches!(
            parse_structured::<Choice>("   "),
            Err(StructuredOutputError::Empty)
        ));
        assert!(matches!(
            parse_structured::<Choice>("no json here"),
            Err(StructuredOutputError::Schema(_))
        ));
        assert!(matches!(
            parse_structured::<Choice>(r#"{"strategy": 3}"#),
            Err(StructuredOutputError::Schema(_))
        ));
    }
}
