use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::domain::{Action, Decision};

/// Metrics registry for the application.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Total decision requests processed
    pub decisions_total: AtomicU64,

    /// Decision requests by effective action
    pub decisions_allow: AtomicU64,
    pub decisions_flag: AtomicU64,
    pub decisions_block: AtomicU64,

    /// Decisions forced to allow by shadow mode
    pub shadow_downgrades: AtomicU64,

    /// Rejected credentials
    pub auth_failures: AtomicU64,

    /// Decision latency buckets (microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_1_5ms: AtomicU64,
    pub latency_5_10ms: AtomicU64,
    pub latency_10_50ms: AtomicU64,
    pub latency_50_100ms: AtomicU64,
    pub latency_over_100ms: AtomicU64,

    /// Audit chain appends
    pub audit_appends_total: AtomicU64,
    pub audit_append_errors: AtomicU64,

    /// Sink delivery attempts
    pub sink_deliveries_total: AtomicU64,
    pub sink_delivery_errors: AtomicU64,
    pub dead_lettered_total: AtomicU64,

    /// Policy reloads
    pub policy_reloads_total: AtomicU64,
    pub policy_reload_errors: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        MetricsRegistry::default()
    }

    /// Record a decision outcome.
    pub fn record_decision(&self, decision: &Decision) {
        self.decisions_total.fetch_add(1, Ordering::Relaxed);

        match decision.effective_action {
            Action::Allow => self.decisions_allow.fetch_add(1, Ordering::Relaxed),
            Action::Flag => self.decisions_flag.fetch_add(1, Ordering::Relaxed),
            Action::Block => self.decisions_block.fetch_add(1, Ordering::Relaxed),
        };

        if decision.is_shadow_downgrade() {
            self.shadow_downgrades.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record decision latency.
    pub fn record_latency(&self, start: Instant) {
        let micros = start.elapsed().as_micros() as u64;

        if micros < 1000 {
            self.latency_under_1ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 5000 {
            self.latency_1_5ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 10000 {
            self.latency_5_10ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 50000 {
            self.latency_10_50ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 100000 {
            self.latency_50_100ms.fetch_add(1, Ordering::Relaxed);
        } else {
            self.latency_over_100ms.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an audit append.
    pub fn record_audit_append(&self, success: bool) {
        self.audit_appends_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.audit_append_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one sink delivery attempt.
    pub fn record_sink_delivery(&self, success: bool) {
        self.sink_deliveries_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.sink_delivery_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a policy reload.
    pub fn record_policy_reload(&self, success: bool) {
        self.policy_reloads_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.policy_reload_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP policygate_decisions_total Total number of decision requests
# TYPE policygate_decisions_total counter
policygate_decisions_total {}

# HELP policygate_decisions Decision requests by effective action
# TYPE policygate_decisions counter
policygate_decisions{{action="allow"}} {}
policygate_decisions{{action="flag"}} {}
policygate_decisions{{action="block"}} {}

# HELP policygate_shadow_downgrades_total Decisions forced to allow by shadow mode
# TYPE policygate_shadow_downgrades_total counter
policygate_shadow_downgrades_total {}

# HELP policygate_auth_failures_total Rejected credentials
# TYPE policygate_auth_failures_total counter
policygate_auth_failures_total {}

# HELP policygate_decision_latency_bucket Decision latency histogram
# TYPE policygate_decision_latency_bucket counter
policygate_decision_latency_bucket{{le="0.001"}} {}
policygate_decision_latency_bucket{{le="0.005"}} {}
policygate_decision_latency_bucket{{le="0.01"}} {}
policygate_decision_latency_bucket{{le="0.05"}} {}
policygate_decision_latency_bucket{{le="0.1"}} {}
policygate_decision_latency_bucket{{le="+Inf"}} {}

# HELP policygate_audit_appends_total Audit chain appends
# TYPE policygate_audit_appends_total counter
policygate_audit_appends_total {}

# HELP policygate_audit_append_errors_total Failed audit chain appends
# TYPE policygate_audit_append_errors_total counter
policygate_audit_append_errors_total {}

# HELP policygate_sink_deliveries_total Sink delivery attempts
# TYPE policygate_sink_deliveries_total counter
policygate_sink_deliveries_total {}

# HELP policygate_sink_delivery_errors_total Failed sink delivery attempts
# TYPE policygate_sink_delivery_errors_total counter
policygate_sink_delivery_errors_total {}

# HELP policygate_dead_lettered_total Batches moved to the dead-letter store
# TYPE policygate_dead_lettered_total counter
policygate_dead_lettered_total {}

# HELP policygate_policy_reloads_total Policy reload operations
# TYPE policygate_policy_reloads_total counter
policygate_policy_reloads_total {}

# HELP policygate_policy_reload_errors_total Policy reload errors
# TYPE policygate_policy_reload_errors_total counter
policygate_policy_reload_errors_total {}
"#,
            self.decisions_total.load(Ordering::Relaxed),
            self.decisions_allow.load(Ordering::Relaxed),
            self.decisions_flag.load(Ordering::Relaxed),
            self.decisions_block.load(Ordering::Relaxed),
            self.shadow_downgrades.load(Ordering::Relaxed),
            self.auth_failures.load(Ordering::Relaxed),
            self.latency_under_1ms.load(Ordering::Relaxed),
            self.latency_1_5ms.load(Ordering::Relaxed),
            self.latency_5_10ms.load(Ordering::Relaxed),
            self.latency_10_50ms.load(Ordering::Relaxed),
            self.latency_50_100ms.load(Ordering::Relaxed),
            self.latency_over_100ms.load(Ordering::Relaxed),
            self.audit_appends_total.load(Ordering::Relaxed),
            self.audit_append_errors.load(Ordering::Relaxed),
            self.sink_deliveries_total.load(Ordering::Relaxed),
            self.sink_delivery_errors.load(Ordering::Relaxed),
            self.dead_lettered_total.load(Ordering::Relaxed),
            self.policy_reloads_total.load(Ordering::Relaxed),
            self.policy_reload_errors.load(Ordering::Relaxed),
        )
    }
}

/// Guard for timing operations.
pub struct TimingGuard<'a> {
    registry: &'a MetricsRegistry,
    start: Instant,
}

impl<'a> TimingGuard<'a> {
    pub fn new(registry: &'a MetricsRegistry) -> Self {
        TimingGuard {
            registry,
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for TimingGuard<'a> {
    fn drop(&mut self) {
        self.registry.record_latency(self.start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(raw: Action, effective: Action) -> Decision {
        Decision {
            raw_action: raw,
            effective_action: effective,
            matched_rule_ids: vec![],
            message: String::new(),
            policy_version: "v1".to_string(),
        }
    }

    #[test]
    fn test_record_decision() {
        let metrics = MetricsRegistry::new();

        metrics.record_decision(&decision(Action::Allow, Action::Allow));
        metrics.record_decision(&decision(Action::Block, Action::Allow));
        metrics.record_decision(&decision(Action::Block, Action::Block));

        assert_eq!(metrics.decisions_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.decisions_allow.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.decisions_block.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.shadow_downgrades.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_timing_guard_records_latency() {
        let metrics = MetricsRegistry::new();

        {
            let _timer = TimingGuard::new(&metrics);
        }

        assert!(metrics.latency_under_1ms.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = MetricsRegistry::new();
        metrics.record_decision(&decision(Action::Flag, Action::Flag));
        metrics.record_sink_delivery(false);

        let output = metrics.to_prometheus();

        assert!(output.contains("policygate_decisions_total 1"));
        assert!(output.contains("policygate_decisions{action=\"flag\"} 1"));
        assert!(output.contains("policygate_sink_delivery_errors_total 1"));
    }
}
