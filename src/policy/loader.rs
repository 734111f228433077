use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::domain::Policy;
use crate::rules::RuleSet;

/// Errors that can occur during policy loading.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid pattern in {name}: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Load a policy from a YAML file.
pub fn load_policy(path: impl AsRef<Path>) -> Result<Policy, PolicyError> {
    let content = fs::read_to_string(path)?;
    parse_policy(&content)
}

/// Parse and validate a policy document.
pub fn parse_policy(content: &str) -> Result<Policy, PolicyError> {
    let policy: Policy = serde_yaml::from_str(content)?;

    validate_policy(&policy)?;

    Ok(policy)
}

/// Validate policy configuration.
fn validate_policy(policy: &Policy) -> Result<(), PolicyError> {
    if policy.version.is_empty() {
        return Err(PolicyError::Validation(
            "Policy version cannot be empty".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for rule in &policy.rules {
        if rule.id.trim().is_empty() {
            return Err(PolicyError::Validation("Rule ID cannot be empty".to_string()));
        }

        if !seen_ids.insert(&rule.id) {
            return Err(PolicyError::Validation(format!(
                "Duplicate rule ID: {}",
                rule.id
            )));
        }

        let matcher = &rule.matcher;
        if matcher.pattern.is_some() == matcher.max_length.is_some() {
            return Err(PolicyError::Validation(format!(
                "Rule {} must define exactly one of pattern or max_length",
                rule.id
            )));
        }

        if matcher.min_occurrences == 0 {
            return Err(PolicyError::Validation(format!(
                "Rule {} has min_occurrences 0",
                rule.id
            )));
        }

        if matcher.predicate.is_some() && matcher.pattern.is_none() {
            return Err(PolicyError::Validation(format!(
                "Rule {} uses a predicate without a pattern",
                rule.id
            )));
        }
    }

    Ok(())
}

/// Policy loader bound to one rule source.
pub struct PolicyLoader {
    policy_path: String,
}

impl PolicyLoader {
    /// Create a new policy loader.
    pub fn new(policy_path: impl Into<String>) -> Self {
        PolicyLoader {
            policy_path: policy_path.into(),
        }
    }

    /// Load the policy and compile it into a RuleSet.
    pub fn load(&self) -> Result<(Policy, RuleSet), PolicyError> {
        let policy = load_policy(&self.policy_path)?;
        let ruleset = RuleSet::from_policy(&policy)?;

        Ok((policy, ruleset))
    }

    /// Load only the policy (without compiling rules).
    pub fn load_policy(&self) -> Result<Policy, PolicyError> {
        load_policy(&self.policy_path)
    }

    /// Get the policy file path.
    pub fn policy_path(&self) -> &str {
        &self.policy_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_policy() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
policy_version: "test-1.0"
rules:
  - id: SSN-1
    title: US SSN
    severity: high
    action: block
    match:
      pattern: '\b\d{{3}}-\d{{2}}-\d{{4}}\b'
  - id: LONG-1
    action: flag
    directions: [inbound]
    match:
      max_length: 2000
"#
        )
        .unwrap();

        let policy = load_policy(file.path()).unwrap();

        assert_eq!(policy.version, "test-1.0");
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[1].matcher.max_length, Some(2000));
    }

    #[test]
    fn test_policy_validation_empty_version() {
        let result = parse_policy(
            r#"
policy_version: ""
rules: []
"#,
        );

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("version"));
    }

    #[test]
    fn test_policy_validation_duplicate_ids() {
        let result = parse_policy(
            r#"
policy_version: "test"
rules:
  - id: R1
    action: block
    match: { pattern: "a" }
  - id: R1
    action: flag
    match: { pattern: "b" }
"#,
        );

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn test_policy_validation_matcher_shape() {
        let both = parse_policy(
            r#"
policy_version: "test"
rules:
  - id: R1
    action: block
    match: { pattern: "a", max_length: 10 }
"#,
        );
        assert!(matches!(both, Err(PolicyError::Validation(_))));

        let zero = parse_policy(
            r#"
policy_version: "test"
rules:
  - id: R1
    action: block
    match: { pattern: "a", min_occurrences: 0 }
"#,
        );
        assert!(matches!(zero, Err(PolicyError::Validation(_))));

        let predicate_only = parse_policy(
            r#"
policy_version: "test"
rules:
  - id: R1
    action: block
    match: { max_length: 10, predicate: luhn }
"#,
        );
        assert!(matches!(predicate_only, Err(PolicyError::Validation(_))));
    }

    #[test]
    fn test_unknown_action_is_yaml_error() {
        let result = parse_policy(
            r#"
policy_version: "test"
rules:
  - id: R1
    action: quarantine
    match: { pattern: "a" }
"#,
        );

        assert!(matches!(result, Err(PolicyError::Yaml(_))));
    }

    #[test]
    fn test_policy_loader() {
        let mut policy_file = NamedTempFile::new().unwrap();
        writeln!(
            policy_file,
            r#"
policy_version: "test-1.0"
rules:
  - id: R1
    action: block
    match:
      pattern: "(?i)api[_-]?key"
"#
        )
        .unwrap();

        let loader = PolicyLoader::new(policy_file.path().to_string_lossy());

        let (policy, ruleset) = loader.load().unwrap();

        assert_eq!(policy.version, "test-1.0");
        assert_eq!(ruleset.len(), 1);
        assert_eq!(ruleset.policy_version, "test-1.0");
    }

    #[test]
    fn test_policy_loader_rejects_bad_regex() {
        let mut policy_file = NamedTempFile::new().unwrap();
        writeln!(
            policy_file,
            r#"
policy_version: "test-1.0"
rules:
  - id: R1
    action: block
    match:
      pattern: "(unclosed"
"#
        )
        .unwrap();

        let loader = PolicyLoader::new(policy_file.path().to_string_lossy());
        assert!(matches!(loader.load(), Err(PolicyError::Pattern { .. })));
    }
}
