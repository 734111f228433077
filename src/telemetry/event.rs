use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::domain::{Action, Decision, Direction};

/// One decision as reported to telemetry sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub endpoint: String,
    pub direction: Direction,
    /// The applied (effective) action
    pub decision: Action,
    pub shadow_mode: bool,
    pub rule_ids: Vec<String>,
    pub latency_ms: f64,
    #[serde(default)]
    pub metadata: Value,
}

impl TelemetryEvent {
    /// Build from a decision. `raw_action` and the policy version travel in
    /// metadata so shadow trials stay observable.
    pub fn from_decision(
        request_id: impl Into<String>,
        endpoint: impl Into<String>,
        direction: Direction,
        decision: &Decision,
        shadow_mode: bool,
        latency: Duration,
        agent_id: &str,
    ) -> Self {
        TelemetryEvent {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            endpoint: endpoint.into(),
            direction,
            decision: decision.effective_action,
            shadow_mode,
            rule_ids: decision.matched_rule_ids.clone(),
            latency_ms: latency.as_secs_f64() * 1000.0,
            metadata: json!({
                "raw_action": decision.raw_action,
                "policy_version": decision.policy_version,
                "agent_id": agent_id,
            }),
        }
    }
}

/// Counter dimension: (endpoint, direction, rule_id, decision).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CounterKey {
    pub endpoint: String,
    pub direction: Direction,
    pub rule_id: String,
    pub decision: Action,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_records_effective_action() {
        let decision = Decision {
            raw_action: Action::Block,
            effective_action: Action::Allow,
            matched_rule_ids: vec!["R2".to_string()],
            message: "shadow mode: would block (R2)".to_string(),
            policy_version: "v3".to_string(),
        };

        let event = TelemetryEvent::from_decision(
            "req-1",
            "/chat",
            Direction::Inbound,
            &decision,
            true,
            Duration::from_micros(1500),
            "agent-7",
        );

        assert_eq!(event.decision, Action::Allow);
        assert_eq!(event.metadata["raw_action"], "block");
        assert_eq!(event.rule_ids, vec!["R2"]);
        assert!((event.latency_ms - 1.5).abs() < 1e-9);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["decision"], "allow");
        assert_eq!(json["direction"], "inbound");
    }
}
