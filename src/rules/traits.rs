use std::fmt::Debug;

use crate::domain::{Action, Direction, Severity};

/// Where a rule applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleScope {
    /// Empty means every direction
    pub directions: Vec<Direction>,
    /// Exact endpoint paths or `prefix*` patterns; empty means every endpoint
    pub endpoints: Vec<String>,
}

impl RuleScope {
    /// Check whether a request with this direction and endpoint is in scope.
    pub fn matches(&self, direction: Direction, endpoint: &str) -> bool {
        let direction_ok = self.directions.is_empty() || self.directions.contains(&direction);
        if !direction_ok {
            return false;
        }

        self.endpoints.is_empty()
            || self.endpoints.iter().any(|candidate| {
                match candidate.strip_suffix('*') {
                    Some(prefix) => endpoint.starts_with(prefix),
                    None => candidate == endpoint,
                }
            })
    }
}

/// Properties shared by every compiled rule.
#[derive(Debug, Clone)]
pub struct RuleMeta {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub action: Action,
    pub scope: RuleScope,
    pub shadow_override: bool,
}

/// Result of testing one rule's matcher against a text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleResult {
    /// Whether the rule fired
    pub hit: bool,
    /// Number of counted matches (1 for length rules that fired)
    pub occurrences: usize,
}

impl RuleResult {
    #[inline]
    pub fn miss() -> Self {
        RuleResult::default()
    }

    #[inline]
    pub fn hit(occurrences: usize) -> Self {
        RuleResult {
            hit: true,
            occurrences,
        }
    }
}

/// A compiled content rule.
///
/// Rules are stateless and evaluated synchronously in the request path.
/// They only look at the text; scope filtering happens in the engine.
pub trait ContentRule: Send + Sync + Debug {
    fn meta(&self) -> &RuleMeta;

    /// Unique identifier for this rule.
    fn id(&self) -> &str {
        &self.meta().id
    }

    /// Test the rule's matcher against the text.
    fn evaluate(&self, text: &str) -> RuleResult;
}
