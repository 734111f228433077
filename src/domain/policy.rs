use serde::{Deserialize, Serialize};
use std::fmt;

use super::Action;

/// Policy document defining the rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy version identifier
    #[serde(rename = "policy_version")]
    pub version: String,

    /// Rule definitions
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

impl Policy {
    /// Create an empty policy.
    pub fn empty() -> Self {
        Policy {
            version: "0.0.0".to_string(),
            rules: Vec::new(),
        }
    }
}

/// Traffic direction of the evaluated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Text flowing into the protected system (e.g. prompts)
    Inbound,
    /// Text leaving the protected system (e.g. responses)
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule severity, informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Extra check applied to each pattern match before it counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Digits in the match must pass the Luhn checksum (card numbers)
    Luhn,
    /// Match must be a structurally valid US SSN (area not 000, 666 or 9xx)
    SsnArea,
}

/// How a rule inspects the text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDef {
    /// Regular expression counted over the text
    #[serde(default)]
    pub pattern: Option<String>,

    /// Minimum non-overlapping matches for the rule to fire
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,

    /// Compile the pattern case-insensitively
    #[serde(default)]
    pub case_insensitive: bool,

    /// Optional per-match validation
    #[serde(default)]
    pub predicate: Option<Predicate>,

    /// Fire when the text is longer than this many characters
    #[serde(default)]
    pub max_length: Option<usize>,
}

fn default_min_occurrences() -> usize {
    1
}

/// Definition of a single rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    /// Unique rule identifier
    pub id: String,

    /// Short description
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub severity: Severity,

    /// Action to take when the rule fires
    pub action: Action,

    /// Directions the rule applies to (empty means all)
    #[serde(default)]
    pub directions: Vec<Direction>,

    /// Endpoints the rule applies to; exact paths or `prefix*` (empty means all)
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Enforce this rule even in shadow mode
    #[serde(default)]
    pub shadow_override: bool,

    #[serde(rename = "match")]
    pub matcher: MatchDef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_deserialization() {
        let yaml = r#"
policy_version: "2026-10-01.1"
rules:
  - id: SSN-1
    title: US social security number
    severity: high
    action: block
    directions: [outbound]
    endpoints: ["/lookup"]
    match:
      pattern: '\b\d{3}-\d{2}-\d{4}\b'
      predicate: ssn_area
  - id: LEN-1
    action: flag
    shadow_override: true
    match:
      max_length: 4000
"#;

        let policy: Policy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.version, "2026-10-01.1");
        assert_eq!(policy.rules.len(), 2);

        let ssn = &policy.rules[0];
        assert_eq!(ssn.action, Action::Block);
        assert_eq!(ssn.severity, Severity::High);
        assert_eq!(ssn.directions, vec![Direction::Outbound]);
        assert_eq!(ssn.matcher.min_occurrences, 1);
        assert_eq!(ssn.matcher.predicate, Some(Predicate::SsnArea));

        let len = &policy.rules[1];
        assert!(len.shadow_override);
        assert_eq!(len.severity, Severity::Medium);
        assert_eq!(len.matcher.max_length, Some(4000));
        assert!(len.matcher.pattern.is_none());
    }
}
