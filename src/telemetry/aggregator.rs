use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::alert::{AlertDispatcher, AlertError, AlertOutcome};
use super::event::{CounterKey, TelemetryEvent};
use crate::domain::{Action, Direction};
use crate::resilience::{DeadLetterError, Delivery, ReplayReport, ResilientSink};

/// One counter row in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterEntry {
    pub endpoint: String,
    pub direction: Direction,
    pub rule_id: String,
    pub decision: Action,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Events waiting for the next flush
    pub pending: usize,
    pub total_events: u64,
    pub counters: Vec<CounterEntry>,
}

/// Outcome of one flush across all sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub events: usize,
    pub delivered: Vec<String>,
    pub dead_lettered: Vec<String>,
    pub failed: Vec<String>,
}

/// Buffers telemetry events, keeps cumulative counters and fans batches out
/// to every configured sink on a timer.
pub struct TelemetryAggregator {
    sinks: Vec<Arc<ResilientSink>>,
    alerts: AlertDispatcher,
    pending: Mutex<Vec<TelemetryEvent>>,
    counters: RwLock<HashMap<CounterKey, Arc<AtomicU64>>>,
    total_events: AtomicU64,
}

impl TelemetryAggregator {
    pub fn new(sinks: Vec<Arc<ResilientSink>>, alerts: AlertDispatcher) -> Self {
        TelemetryAggregator {
            sinks,
            alerts,
            pending: Mutex::new(Vec::new()),
            counters: RwLock::new(HashMap::new()),
            total_events: AtomicU64::new(0),
        }
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Buffer an event, bump a counter per matched rule and forward flag and
    /// block decisions to the alert dispatcher.
    pub fn record_event(&self, event: TelemetryEvent) -> Result<AlertOutcome, AlertError> {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        for rule_id in &event.rule_ids {
            let key = CounterKey {
                endpoint: event.endpoint.clone(),
                direction: event.direction,
                rule_id: rule_id.clone(),
                decision: event.decision,
            };
            self.counter(key).fetch_add(1, Ordering::Relaxed);
        }

        let outcome = self.alerts.submit(&event);
        self.pending.lock().push(event);
        outcome
    }

    fn counter(&self, key: CounterKey) -> Arc<AtomicU64> {
        // Fast path: read lock
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(&key) {
                return counter.clone();
            }
        }

        self.counters
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let mut counters: Vec<CounterEntry> = self
            .counters
            .read()
            .iter()
            .map(|(key, count)| CounterEntry {
                endpoint: key.endpoint.clone(),
                direction: key.direction,
                rule_id: key.rule_id.clone(),
                decision: key.decision,
                count: count.load(Ordering::Relaxed),
            })
            .collect();
        counters.sort_by(|a, b| {
            (&a.endpoint, a.direction, &a.rule_id, a.decision)
                .cmp(&(&b.endpoint, b.direction, &b.rule_id, b.decision))
        });

        CounterSnapshot {
            pending: self.pending.lock().len(),
            total_events: self.total_events.load(Ordering::Relaxed),
            counters,
        }
    }

    /// Swap out the pending events and deliver them to every sink
    /// concurrently. One sink failing never holds up another.
    pub async fn flush(&self) -> FlushReport {
        let events = std::mem::take(&mut *self.pending.lock());
        let mut report = FlushReport {
            events: events.len(),
            ..Default::default()
        };
        if events.is_empty() || self.sinks.is_empty() {
            return report;
        }

        let batch: Arc<Vec<Value>> = Arc::new(
            events
                .iter()
                .filter_map(|event| match serde_json::to_value(event) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(request_id = %event.request_id, error = %e, "Dropping unserializable telemetry event");
                        None
                    }
                })
                .collect(),
        );

        let mut tasks = JoinSet::new();
        for sink in &self.sinks {
            let sink = sink.clone();
            let batch = batch.clone();
            tasks.spawn(async move {
                let result = sink.send_many(&batch).await;
                (sink.name().to_string(), result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(Delivery::DeadLettered { .. }))) => report.dead_lettered.push(name),
                Ok((name, Ok(_))) => report.delivered.push(name),
                Ok((name, Err(e))) => {
                    warn!(sink = %name, error = %e, "Telemetry delivery failed");
                    report.failed.push(name);
                }
                Err(e) => warn!(error = %e, "Telemetry delivery task panicked"),
            }
        }

        report.delivered.sort();
        report.dead_lettered.sort();
        report.failed.sort();

        debug!(
            events = report.events,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Telemetry flushed"
        );

        report
    }

    /// Replay dead-lettered batches for a telemetry or alert sink.
    /// Returns `Ok(None)` for an unknown target.
    pub async fn replay(&self, target: &str, max_messages: usize) -> Result<Option<ReplayReport>, DeadLetterError> {
        let sink = self
            .sinks
            .iter()
            .chain(self.alerts.sink())
            .find(|sink| sink.name() == target);

        match sink {
            Some(sink) => sink.replay(max_messages).await.map(Some),
            None => Ok(None),
        }
    }

    /// Start the periodic flush loop.
    pub fn start(self: Arc<Self>, interval: Duration) -> TelemetryHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let aggregator = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip first immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        aggregator.flush().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            let report = aggregator.flush().await;
            aggregator.alerts.shutdown().await;
            info!(events = report.events, "Telemetry drained on shutdown");
        });

        TelemetryHandle {
            aggregator: self,
            shutdown_tx,
            handle,
        }
    }
}

/// Running flush loop. Dropping the handle without `shutdown` leaves
/// buffered events unflushed.
pub struct TelemetryHandle {
    aggregator: Arc<TelemetryAggregator>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TelemetryHandle {
    pub fn aggregator(&self) -> &Arc<TelemetryAggregator> {
        &self.aggregator
    }

    /// Stop the loop after a final flush of everything still pending.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Telemetry loop ended abnormally");
        }
    }
}
