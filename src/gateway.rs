//! Decision API: authorize, evaluate, audit, report.
//!
//! A decision is only returned once its audit record is durably written.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditChain, AuditError, AuditFields};
use crate::domain::{Action, Direction};
use crate::engine::DecisionEngine;
use crate::observability::{MetricsRegistry, TimingGuard};
use crate::rules::{Redactor, RuleSet};
use crate::telemetry::{TelemetryAggregator, TelemetryEvent};

/// A request to evaluate one piece of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub text: String,
    pub direction: Direction,
    pub endpoint: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub credential: String,
}

/// What the caller learns about a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub request_id: String,
    pub effective_action: Action,
    pub matched_rule_ids: Vec<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("decision could not be recorded: {0}")]
    Storage(#[source] AuditError),
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayLimits {
    pub max_text_bytes: usize,
    /// Characters of redacted text kept in the audit record
    pub excerpt_chars: usize,
}

impl Default for GatewayLimits {
    fn default() -> Self {
        GatewayLimits {
            max_text_bytes: 64 * 1024,
            excerpt_chars: 200,
        }
    }
}

pub struct Gateway {
    engine: DecisionEngine,
    audit: Arc<AuditChain>,
    telemetry: Arc<TelemetryAggregator>,
    redactor: Arc<Redactor>,
    api_key: String,
    limits: GatewayLimits,
    metrics: Arc<MetricsRegistry>,
}

impl Gateway {
    pub fn new(
        engine: DecisionEngine,
        audit: Arc<AuditChain>,
        telemetry: Arc<TelemetryAggregator>,
        redactor: Arc<Redactor>,
        api_key: impl Into<String>,
        limits: GatewayLimits,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Gateway {
            engine,
            audit,
            telemetry,
            redactor,
            api_key: api_key.into(),
            limits,
            metrics,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    pub fn redactor(&self) -> &Arc<Redactor> {
        &self.redactor
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Constant-time credential comparison.
    pub fn authorize(&self, credential: &str) -> bool {
        !self.api_key.is_empty() && bool::from(self.api_key.as_bytes().ct_eq(credential.as_bytes()))
    }

    /// Evaluate a request and record the outcome.
    ///
    /// Fails with `GatewayError::Storage` if the audit append fails; the
    /// decision is then never reported.
    pub fn check(&self, req: DecisionRequest) -> Result<DecisionResponse, GatewayError> {
        let request_id = Uuid::new_v4().to_string();

        if !self.authorize(&req.credential) {
            self.record_auth_failure(&request_id, &req);
            return Err(GatewayError::Unauthorized);
        }

        self.validate(&req)?;

        let start = Instant::now();
        let _timer = TimingGuard::new(&self.metrics);

        let decision = self
            .engine
            .evaluate(&req.text, req.direction, &req.endpoint, &req.agent_id);
        let shadow_mode = self.engine.shadow().enabled;

        let fields = AuditFields {
            request_id: request_id.clone(),
            action: decision.effective_action.as_str().to_string(),
            direction: req.direction.as_str().to_string(),
            endpoint: req.endpoint.clone(),
            rule_ids: decision.matched_rule_ids.clone(),
            text_excerpt: self.redactor.excerpt(&req.text, self.limits.excerpt_chars),
            metadata: json!({
                "raw_action": decision.raw_action,
                "agent_id": req.agent_id,
                "shadow_mode": shadow_mode,
                "policy_version": decision.policy_version,
                "message": decision.message,
            }),
        };

        if let Err(e) = self.audit.append(fields) {
            self.metrics.record_audit_append(false);
            error!(request_id = %request_id, error = %e, "Audit append failed, decision withheld");
            return Err(GatewayError::Storage(e));
        }
        self.metrics.record_audit_append(true);
        self.metrics.record_decision(&decision);

        let event = TelemetryEvent::from_decision(
            request_id.clone(),
            req.endpoint.clone(),
            req.direction,
            &decision,
            shadow_mode,
            start.elapsed(),
            &req.agent_id,
        );
        if let Err(e) = self.telemetry.record_event(event) {
            warn!(request_id = %request_id, error = %e, "Alert not dispatched");
        }

        info!(
            request_id = %request_id,
            agent_id = %req.agent_id,
            endpoint = %req.endpoint,
            raw = %decision.raw_action,
            effective = %decision.effective_action,
            latency_us = start.elapsed().as_micros() as u64,
            "Decision completed"
        );

        Ok(DecisionResponse {
            request_id,
            effective_action: decision.effective_action,
            matched_rule_ids: decision.matched_rule_ids,
            message: decision.message,
        })
    }

    fn validate(&self, req: &DecisionRequest) -> Result<(), GatewayError> {
        if !req.endpoint.starts_with('/') {
            return Err(GatewayError::Validation("endpoint must start with '/'".to_string()));
        }
        if req.text.len() > self.limits.max_text_bytes {
            return Err(GatewayError::Validation(format!(
                "text exceeds {} bytes",
                self.limits.max_text_bytes
            )));
        }
        Ok(())
    }

    /// Best effort: a failed security record must not mask the rejection.
    fn record_auth_failure(&self, request_id: &str, req: &DecisionRequest) {
        self.metrics.record_auth_failure();
        warn!(request_id = %request_id, agent_id = %req.agent_id, "Rejected credential");

        let fields = AuditFields::event(
            "auth_failure",
            request_id,
            json!({
                "agent_id": req.agent_id,
                "endpoint": req.endpoint,
                "direction": req.direction,
            }),
        );
        if let Err(e) = self.audit.append(fields) {
            warn!(request_id = %request_id, error = %e, "Failed to audit auth failure");
        }
    }
}

/// Append a `policy_reload` record each time the watched rule set changes.
pub fn spawn_reload_auditor(
    mut ruleset_rx: watch::Receiver<Arc<RuleSet>>,
    audit: Arc<AuditChain>,
) -> JoinHandle<()> {
    // Mark the current rule set seen before spawning so a swap racing the
    // first poll still wakes the task
    let mut previous = ruleset_rx.borrow_and_update().policy_version.clone();

    tokio::spawn(async move {
        while ruleset_rx.changed().await.is_ok() {
            let (version, rules) = {
                let ruleset = ruleset_rx.borrow_and_update();
                (ruleset.policy_version.clone(), ruleset.len())
            };

            let fields = AuditFields::event(
                "policy_reload",
                Uuid::new_v4().to_string(),
                json!({
                    "previous_version": previous,
                    "policy_version": version,
                    "rules": rules,
                }),
            );
            match audit.append(fields) {
                Ok(_) => info!(version = %version, "Policy reload audited"),
                Err(e) => error!(version = %version, error = %e, "Failed to audit policy reload"),
            }

            previous = version;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditFilter, AuditRecord, GENESIS_HASH};
    use crate::engine::ShadowPolicy;
    use crate::observability::init_test_tracing;
    use crate::policy::parse_policy;
    use crate::rules::RedactionPattern;
    use crate::telemetry::AlertDispatcher;
    use std::time::Duration;
    use tempfile::TempDir;

    const POLICY: &str = r#"
policy_version: "v1"
rules:
  - id: SSN-1
    action: block
    directions: [outbound]
    endpoints: ["/lookup"]
    match:
      pattern: '\b\d{3}-\d{2}-\d{4}\b'
  - id: CARD-1
    action: flag
    match:
      pattern: '\b(?:\d[ -]?){13,16}\b'
      predicate: luhn
"#;

    fn gateway(dir: &TempDir, shadow: ShadowPolicy) -> Gateway {
        init_test_tracing();
        let ruleset = RuleSet::from_policy(&parse_policy(POLICY).unwrap()).unwrap();
        let audit = Arc::new(AuditChain::open(dir.path().join("audit.jsonl")).unwrap().without_sync());
        let redactor = Redactor::new(&[RedactionPattern {
            name: "ssn".to_string(),
            pattern: r"\d{3}-\d{2}-\d{4}".to_string(),
            replacement: None,
        }])
        .unwrap();

        Gateway::new(
            DecisionEngine::with_ruleset(ruleset, shadow),
            audit,
            Arc::new(TelemetryAggregator::new(vec![], AlertDispatcher::disabled())),
            Arc::new(redactor),
            "s3cret",
            GatewayLimits::default(),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn request(text: &str, direction: Direction, endpoint: &str) -> DecisionRequest {
        DecisionRequest {
            text: text.to_string(),
            direction,
            endpoint: endpoint.to_string(),
            agent_id: "agent-1".to_string(),
            credential: "s3cret".to_string(),
        }
    }

    fn records(gateway: &Gateway) -> Vec<AuditRecord> {
        gateway
            .audit()
            .get(&AuditFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_ssn_lookup_is_blocked_and_audited() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, ShadowPolicy::disabled());

        let response = gateway
            .check(request("SSN 123-45-6789", Direction::Outbound, "/lookup"))
            .unwrap();

        assert_eq!(response.effective_action, Action::Block);
        assert_eq!(response.matched_rule_ids, vec!["SSN-1"]);

        let records = records(&gateway);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].previous_hash, GENESIS_HASH);
        assert_eq!(records[0].request_id, response.request_id);
        assert_eq!(records[0].action, "block");
        assert_eq!(records[0].text_excerpt, "SSN [REDACTED:ssn]");
        assert_eq!(records[0].metadata["raw_action"], "block");

        let second = gateway
            .check(request("hello", Direction::Inbound, "/chat"))
            .unwrap();
        assert_eq!(second.effective_action, Action::Allow);

        let records = self::records(&gateway);
        assert_eq!(records[1].previous_hash, records[0].content_hash);
        assert!(gateway.audit().verify().unwrap().valid);
    }

    #[test]
    fn test_shadow_mode_records_effective_action() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, ShadowPolicy::enabled(["CARD-1"]));

        let response = gateway
            .check(request("SSN 123-45-6789", Direction::Outbound, "/lookup"))
            .unwrap();

        assert_eq!(response.effective_action, Action::Allow);
        assert_eq!(response.matched_rule_ids, vec!["SSN-1"]);

        let record = &records(&gateway)[0];
        assert_eq!(record.action, "allow");
        assert_eq!(record.metadata["raw_action"], "block");
        assert_eq!(record.metadata["shadow_mode"], true);

        let snapshot = gateway.telemetry().snapshot();
        assert_eq!(snapshot.counters[0].decision, Action::Allow);
        assert_eq!(snapshot.counters[0].rule_id, "SSN-1");
    }

    #[test]
    fn test_bad_credential_is_rejected_and_audited() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, ShadowPolicy::disabled());

        let mut req = request("SSN 123-45-6789", Direction::Outbound, "/lookup");
        req.credential = "guess".to_string();

        assert!(matches!(gateway.check(req), Err(GatewayError::Unauthorized)));

        let records = records(&gateway);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "auth_failure");
        assert!(records[0].text_excerpt.is_empty());
        assert_eq!(gateway.telemetry().snapshot().total_events, 0);
    }

    #[test]
    fn test_validation_errors() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, ShadowPolicy::disabled());

        assert!(matches!(
            gateway.check(request("x", Direction::Inbound, "chat")),
            Err(GatewayError::Validation(_))
        ));

        let long = "a".repeat(GatewayLimits::default().max_text_bytes + 1);
        assert!(matches!(
            gateway.check(request(&long, Direction::Inbound, "/chat")),
            Err(GatewayError::Validation(_))
        ));
        assert!(gateway.audit().is_empty());
    }

    #[test]
    fn test_storage_failure_withholds_decision() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, ShadowPolicy::disabled());
        gateway.audit().break_storage();

        let result = gateway.check(request("hello", Direction::Inbound, "/chat"));

        assert!(matches!(result, Err(GatewayError::Storage(AuditError::Storage(_)))));
        assert_eq!(gateway.telemetry().snapshot().total_events, 0);
        assert_eq!(
            gateway
                .metrics()
                .audit_append_errors
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_reload_auditor_appends_policy_reload() {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(AuditChain::open(dir.path().join("audit.jsonl")).unwrap().without_sync());
        let (tx, rx) = watch::channel(Arc::new(RuleSet::empty()));

        let handle = spawn_reload_auditor(rx, audit.clone());

        // Swapped before the auditor task has run at all
        let next = RuleSet::from_policy(&parse_policy(POLICY).unwrap()).unwrap();
        tx.send(Arc::new(next)).unwrap();

        for _ in 0..50 {
            if !audit.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let reloads: Vec<AuditRecord> = audit
            .get(&AuditFilter::all().with_action("policy_"))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(reloads.len(), 1);
        assert_eq!(reloads[0].metadata["policy_version"], "v1");
        assert_eq!(reloads[0].metadata["previous_version"], "0.0.0");
        assert_eq!(reloads[0].metadata["rules"], 2);

        drop(tx);
        handle.await.unwrap();
    }
}
