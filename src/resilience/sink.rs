use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::breaker::{CallError, CircuitBreaker};
use super::dead_letter::{DeadLetterEntry, DeadLetterError, DeadLetterStore};
use super::retry::RetryPolicy;
use crate::observability::MetricsRegistry;
use crate::sinks::{EventSink, SinkError};

/// Reason recorded when a batch skips delivery because the breaker is open.
pub const CIRCUIT_OPEN_REASON: &str = "circuit open";

/// How a batch left `send_many`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    /// Parked in the dead-letter store without exhausting retries
    DeadLettered { reason: String },
    Empty,
}

/// Result of re-attempting dead-lettered batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub target: String,
    pub attempted: usize,
    pub succeeded: usize,
    /// Entry id and the reason it failed again
    pub failed: Vec<(Uuid, String)>,
}

/// A sink composed with its breaker, retry policy and dead-letter store.
///
/// Built once per dependency; the operation is the wrapped sink itself.
pub struct ResilientSink {
    sink: Arc<dyn EventSink>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ResilientSink {
    pub fn new(
        sink: Arc<dyn EventSink>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        dead_letters: Arc<dyn DeadLetterStore>,
    ) -> Self {
        ResilientSink {
            sink,
            breaker,
            retry,
            dead_letters,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterStore> {
        &self.dead_letters
    }

    /// Deliver a batch, retrying with backoff.
    ///
    /// An open circuit parks the batch as `circuit open` and returns
    /// `Ok(Delivery::DeadLettered)`. When every attempt fails the batch is
    /// dead-lettered and the last error is returned as `SinkError::Exhausted`.
    pub async fn send_many(&self, batch: &[Value]) -> Result<Delivery, SinkError> {
        if batch.is_empty() {
            return Ok(Delivery::Empty);
        }

        let max_attempts = self.retry.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match self.breaker.call(|| self.sink.send_batch(batch)).await {
                Ok(()) => {
                    debug!(sink = self.name(), attempt = attempt, events = batch.len(), "Batch delivered");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_sink_delivery(true);
                    }
                    return Ok(Delivery::Delivered { attempts: attempt });
                }
                Err(CallError::Open(_)) => {
                    self.park(batch, CIRCUIT_OPEN_REASON, attempt - 1);
                    return Ok(Delivery::DeadLettered {
                        reason: CIRCUIT_OPEN_REASON.to_string(),
                    });
                }
                Err(CallError::Timeout { timeout, .. }) => SinkError::Timeout(timeout),
                Err(CallError::Inner(e)) => e,
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_sink_delivery(false);
            }

            if attempt >= max_attempts {
                self.park(batch, &error.to_string(), attempt);
                return Err(SinkError::Exhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.retry.delay(attempt);
            debug!(
                sink = self.name(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Delivery failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn park(&self, batch: &[Value], reason: &str, retry_count: u32) {
        let entry = DeadLetterEntry::new(self.name(), batch.to_vec(), reason, retry_count);
        let id = entry.id;

        match self.dead_letters.push(entry) {
            Ok(()) => {
                warn!(
                    sink = self.name(),
                    entry_id = %id,
                    events = batch.len(),
                    reason = reason,
                    "Batch dead-lettered"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_dead_letter();
                }
            }
            Err(e) => {
                warn!(sink = self.name(), error = %e, events = batch.len(), "Failed to dead-letter batch, events dropped");
            }
        }
    }

    /// Re-attempt up to `max_messages` parked batches, oldest first, one
    /// attempt each. Delivered entries are removed as soon as they land;
    /// failed ones stay with an incremented retry count.
    pub async fn replay(&self, max_messages: usize) -> Result<ReplayReport, DeadLetterError> {
        let target = self.name().to_string();
        let entries = self.dead_letters.list(&target, Some(max_messages))?;

        let mut report = ReplayReport {
            target: target.clone(),
            ..Default::default()
        };
        for entry in entries {
            report.attempted += 1;

            let outcome = self
                .breaker
                .call(|| self.sink.send_batch(&entry.original_batch))
                .await;

            match outcome {
                Ok(()) => {
                    // Removed now so a later store error cannot leave it
                    // parked for redelivery
                    self.dead_letters.remove(&target, &[entry.id])?;
                    report.succeeded += 1;
                }
                Err(e) => {
                    let reason = match e {
                        CallError::Open(_) => CIRCUIT_OPEN_REASON.to_string(),
                        other => other.to_string(),
                    };
                    self.dead_letters
                        .update_retry_count(&target, entry.id, entry.retry_count + 1)?;
                    report.failed.push((entry.id, reason));
                }
            }
        }

        info!(
            sink = %target,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            "Dead-letter replay finished"
        );

        Ok(report)
    }
}
