use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::policy::PolicyError;

/// Configured masking pattern.
///
/// Redaction patterns are independent of the detection rules: a span can
/// be masked in stored excerpts without any rule firing on it, and a
/// firing rule does not imply its span gets masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionPattern {
    pub name: String,
    pub pattern: String,
    /// Defaults to `[REDACTED:<name>]`
    #[serde(default)]
    pub replacement: Option<String>,
}

#[derive(Debug)]
struct CompiledRedaction {
    regex: Regex,
    replacement: String,
}

/// Masks sensitive spans before text reaches the audit trail.
#[derive(Debug, Default)]
pub struct Redactor {
    patterns: Vec<CompiledRedaction>,
}

impl Redactor {
    pub fn new(patterns: &[RedactionPattern]) -> Result<Self, PolicyError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let regex = Regex::new(&p.pattern).map_err(|source| PolicyError::Pattern {
                    name: p.name.clone(),
                    source,
                })?;
                let replacement = p
                    .replacement
                    .clone()
                    .unwrap_or_else(|| format!("[REDACTED:{}]", p.name));
                Ok(CompiledRedaction { regex, replacement })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        Ok(Redactor { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Apply every pattern in order.
    pub fn redact(&self, text: &str) -> String {
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, p| {
                p.regex
                    .replace_all(&acc, regex::NoExpand(&p.replacement))
                    .into_owned()
            })
    }

    /// Redact, then cut to at most `max_chars` characters.
    pub fn excerpt(&self, text: &str, max_chars: usize) -> String {
        let redacted = self.redact(text);
        match redacted.char_indices().nth(max_chars) {
            Some((cut, _)) => redacted[..cut].to_string(),
            None => redacted,
        }
    }
}
