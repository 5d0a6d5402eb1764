use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

struct Patterns {
    api_key: Regex,
    token: Regex,
    bearer: Regex,
    password: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // Provider-style secret keys: sk-..., sk-ant-..., sk-proj-...
        api_key: Regex::new(r"sk-[a-zA-Z0-9_-]{16,}").expect("api key pattern is valid"),
        token: Regex::new(
            r#"["']?(?:api_key|apikey|access_token|token|secret)["']?\s*[:=]\s*["']?([a-zA-Z0-9_.-]{16,})["']?"#,
        )
        .expect("token pattern is valid"),
        bearer: Regex::new(r"Bearer\s+[a-zA-Z0-9_.-]+").expect("bearer pattern is valid"),
        password: Regex::new(r#"["']?password["']?\s*[:=]\s*["']?([^"'\s,}]+)["']?"#)
            .expect("password pattern is valid"),
    })
}

/// Redacts credentials from text before it is stored in previews.
///
/// Step inputs and outputs often carry request parameters, so previews in the
/// pipeline log go through this before they are kept or persisted. Every
/// scrubber shares one compiled pattern set.
#[derive(Clone, Copy)]
pub struct SecretScrubber {
    patterns: &'static Patterns,
}

impl SecretScrubber {
    /// Create a new scrubber
    #[allow(clippy::missing_panics_doc)]
    pub fn new() -> Self {
        Self {
            patterns: patterns(),
        }
    }

    /// Scrub a message of sensitive data
    pub fn scrub(&self, message: &str) -> String {
        let scrubbed = self.patterns.api_key.replace_all(message, "[API_KEY_REDACTED]");
        let scrubbed = self
            .patterns
            .bearer
            .replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]");
        let scrubbed = self
            .patterns
            .token
            .replace_all(&scrubbed, |caps: &regex::Captures| {
                let full_match = &caps[0];
                if let Some(colon_pos) = full_match.find(':') {
                    format!("{}:[REDACTED]", &full_match[..colon_pos])
                } else if let Some(eq_pos) = full_match.find('=') {
                    format!("{}=[REDACTED]", &full_match[..eq_pos])
                } else {
                    "[REDACTED]".to_string()
                }
            });
        self.patterns
            .password
            .replace_all(&scrubbed, "password=[REDACTED]")
            .into_owned()
    }
}

impl Default for SecretScrubber {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretScrubber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretScrubber").finish()
    }
}
