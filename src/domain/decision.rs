use serde::{Deserialize, Serialize};

use super::Action;

/// Outcome of evaluating one input against the active rule set.
///
/// `raw_action` is what the rules asked for. `effective_action` is what the
/// gateway actually applies after shadow-mode policy. Both stay visible so
/// shadow trials can be observed without being enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Strictest action among the firing rules
    pub raw_action: Action,

    /// Action applied to the request
    pub effective_action: Action,

    /// Firing rule ids in declaration order, without duplicates
    pub matched_rule_ids: Vec<String>,

    /// Human-readable summary
    pub message: String,

    /// Policy version the decision was made under
    pub policy_version: String,
}

impl Decision {
    /// Decision for an input that matched nothing.
    pub fn allow(policy_version: impl Into<String>) -> Self {
        Decision {
            raw_action: Action::Allow,
            effective_action: Action::Allow,
            matched_rule_ids: Vec::new(),
            message: "no rules matched".to_string(),
            policy_version: policy_version.into(),
        }
    }

    /// True when shadow mode forced a stricter raw action down to allow.
    pub fn is_shadow_downgrade(&self) -> bool {
        self.effective_action < self.raw_action
    }
}
