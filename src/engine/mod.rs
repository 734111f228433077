//! Decision engine.
//!
//! Evaluates one input against the active rule set and applies shadow-mode
//! policy. The engine has no side effects; callers record the decision in
//! the audit chain and telemetry themselves.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::domain::{Action, Decision, Direction};
use crate::rules::RuleSet;

/// Shadow-mode configuration.
#[derive(Debug, Clone, Default)]
pub struct ShadowPolicy {
    /// When on, only overriding rules are enforced
    pub enabled: bool,
    /// Rule ids enforced even in shadow mode
    pub overrides: HashSet<String>,
}

impl ShadowPolicy {
    pub fn disabled() -> Self {
        ShadowPolicy::default()
    }

    pub fn enabled<I, S>(overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ShadowPolicy {
            enabled: true,
            overrides: overrides.into_iter().map(Into::into).collect(),
        }
    }
}

/// Evaluates requests against the current rule set.
pub struct DecisionEngine {
    ruleset_rx: watch::Receiver<Arc<RuleSet>>,
    shadow: ShadowPolicy,
}

impl DecisionEngine {
    /// Create an engine following a hot-reloaded rule set.
    pub fn new(ruleset_rx: watch::Receiver<Arc<RuleSet>>, shadow: ShadowPolicy) -> Self {
        DecisionEngine { ruleset_rx, shadow }
    }

    /// Create an engine over a fixed rule set.
    pub fn with_ruleset(ruleset: RuleSet, shadow: ShadowPolicy) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(ruleset));
        DecisionEngine::new(rx, shadow)
    }

    /// Current rule set snapshot.
    pub fn ruleset(&self) -> Arc<RuleSet> {
        self.ruleset_rx.borrow().clone()
    }

    pub fn shadow(&self) -> &ShadowPolicy {
        &self.shadow
    }

    /// Evaluate a request against the current rule set.
    pub fn evaluate(
        &self,
        text: &str,
        direction: Direction,
        endpoint: &str,
        agent_id: &str,
    ) -> Decision {
        let ruleset = self.ruleset();
        let decision = self.evaluate_with(&ruleset, text, direction, endpoint);

        debug!(
            agent_id = agent_id,
            endpoint = endpoint,
            raw = %decision.raw_action,
            effective = %decision.effective_action,
            rules = ?decision.matched_rule_ids,
            "Evaluated request"
        );

        decision
    }

    /// Evaluate against an explicit rule set.
    pub fn evaluate_with(
        &self,
        ruleset: &RuleSet,
        text: &str,
        direction: Direction,
        endpoint: &str,
    ) -> Decision {
        let mut raw_action = Action::Allow;
        let mut matched_rule_ids: Vec<String> = Vec::new();
        let mut override_hit = false;

        for rule in &ruleset.rules {
            let meta = rule.meta();
            if !meta.scope.matches(direction, endpoint) {
                continue;
            }

            if !rule.evaluate(text).hit {
                continue;
            }

            raw_action = raw_action.max(meta.action);
            if !matched_rule_ids.iter().any(|id| id == &meta.id) {
                matched_rule_ids.push(meta.id.clone());
            }
            if meta.shadow_override || self.shadow.overrides.contains(&meta.id) {
                override_hit = true;
            }
        }

        // every firing rule is recorded above before any downgrade
        let effective_action = if !self.shadow.enabled || raw_action.is_allow() || override_hit {
            raw_action
        } else {
            Action::Allow
        };

        let message = describe(raw_action, effective_action, &matched_rule_ids);

        Decision {
            raw_action,
            effective_action,
            matched_rule_ids,
            message,
            policy_version: ruleset.policy_version.clone(),
        }
    }
}

fn describe(raw: Action, effective: Action, rule_ids: &[String]) -> String {
    if rule_ids.is_empty() {
        return "no rules matched".to_string();
    }

    let ids = rule_ids.join(", ");
    if effective < raw {
        format!("shadow mode: would {raw} ({ids})")
    } else {
        format!("{effective}: matched {ids}")
    }
}
