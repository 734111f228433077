pub mod length;
pub mod pattern;
pub mod redaction;
pub mod traits;

pub use length::LengthRule;
pub use pattern::PatternRule;
pub use redaction::{RedactionPattern, Redactor};
pub use traits::{ContentRule, RuleMeta, RuleResult, RuleScope};

use std::sync::Arc;

use crate::domain::{Policy, RuleDef};
use crate::policy::PolicyError;

/// Immutable, versioned collection of compiled rules.
///
/// Reloads build a new `RuleSet` and swap it in whole.
#[derive(Debug)]
pub struct RuleSet {
    pub rules: Vec<Arc<dyn ContentRule>>,
    pub policy_version: String,
}

impl RuleSet {
    /// Compile every rule in a validated policy.
    pub fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        let rules = policy
            .rules
            .iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RuleSet {
            rules,
            policy_version: policy.version.clone(),
        })
    }

    /// Create an empty rule set.
    pub fn empty() -> Self {
        RuleSet {
            rules: Vec::new(),
            policy_version: "0.0.0".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(def: &RuleDef) -> Result<Arc<dyn ContentRule>, PolicyError> {
    let meta = RuleMeta {
        id: def.id.clone(),
        title: def.title.clone(),
        severity: def.severity,
        action: def.action,
        scope: RuleScope {
            directions: def.directions.clone(),
            endpoints: def.endpoints.clone(),
        },
        shadow_override: def.shadow_override,
    };

    match (&def.matcher.pattern, def.matcher.max_length) {
        (Some(pattern), None) => {
            let rule = PatternRule::new(
                meta,
                pattern,
                def.matcher.case_insensitive,
                def.matcher.min_occurrences,
                def.matcher.predicate,
            )
            .map_err(|source| PolicyError::Pattern {
                name: def.id.clone(),
                source,
            })?;
            Ok(Arc::new(rule))
        }
        (None, Some(max_length)) => Ok(Arc::new(LengthRule::new(meta, max_length))),
        _ => Err(PolicyError::Validation(format!(
            "Rule {} must define exactly one of pattern or max_length",
            def.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Direction, MatchDef, Severity};

    fn rule_def(id: &str, matcher: MatchDef) -> RuleDef {
        RuleDef {
            id: id.to_string(),
            title: String::new(),
            severity: Severity::Medium,
            action: Action::Flag,
            directions: vec![Direction::Inbound],
            endpoints: vec![],
            shadow_override: false,
            matcher,
        }
    }

    #[test]
    fn test_ruleset_from_policy() {
        let policy = Policy {
            version: "test-1".to_string(),
            rules: vec![
                rule_def(
                    "R1",
                    MatchDef {
                        pattern: Some("secret".to_string()),
                        min_occurrences: 1,
                        ..Default::default()
                    },
                ),
                rule_def(
                    "R2",
                    MatchDef {
                        max_length: Some(100),
                        min_occurrences: 1,
                        ..Default::default()
                    },
                ),
            ],
        };

        let ruleset = RuleSet::from_policy(&policy).unwrap();

        assert_eq!(ruleset.len(), 2);
        assert_eq!(ruleset.policy_version, "test-1");
        assert_eq!(ruleset.rules[0].id(), "R1");
        assert_eq!(ruleset.rules[1].meta().scope.directions, vec![Direction::Inbound]);
    }

    #[test]
    fn test_bad_pattern_names_rule() {
        let policy = Policy {
            version: "test-1".to_string(),
            rules: vec![rule_def(
                "BROKEN",
                MatchDef {
                    pattern: Some("[".to_string()),
                    min_occurrences: 1,
                    ..Default::default()
                },
            )],
        };

        let err = RuleSet::from_policy(&policy).unwrap_err();
        assert!(err.to_string().contains("BROKEN"));
    }

    #[test]
    fn test_empty_matcher_rejected() {
        let policy = Policy {
            version: "test-1".to_string(),
            rules: vec![rule_def("EMPTY", MatchDef::default())],
        };

        assert!(matches!(
            RuleSet::from_policy(&policy),
            Err(PolicyError::Validation(_))
        ));
    }
}
