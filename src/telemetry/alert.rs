use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::TelemetryEvent;
use crate::domain::Action;
use crate::resilience::ResilientSink;

fn default_max_per_window() -> u32 {
    20
}

fn default_window_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    256
}

/// Alert webhook and rate-limit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Alerts admitted per window; the rest are dropped as rate limited
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        AlertSettings {
            enabled: false,
            webhook_url: None,
            max_per_window: default_max_per_window(),
            window_secs: default_window_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// What happened to a submitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Queued,
    RateLimited,
    Disabled,
    /// Allow decisions never alert
    NotAlertable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert queue full")]
    QueueFull,

    #[error("alert dispatcher closed")]
    Closed,
}

/// Fixed-window counter.
#[derive(Debug)]
struct RateWindow {
    started: Instant,
    count: u32,
}

/// Rate-limited alert fan-out for flag and block decisions.
///
/// Alerts are queued and delivered by a background worker through a
/// breaker-guarded, dead-lettering sink.
pub struct AlertDispatcher {
    max_per_window: u32,
    window: Duration,
    rate: Mutex<RateWindow>,
    tx: Mutex<Option<mpsc::Sender<Value>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sink: Option<Arc<ResilientSink>>,
}

impl AlertDispatcher {
    /// Dispatcher that reports every submission as `Disabled`.
    pub fn disabled() -> Self {
        AlertDispatcher {
            max_per_window: 0,
            window: Duration::ZERO,
            rate: Mutex::new(RateWindow {
                started: Instant::now(),
                count: 0,
            }),
            tx: Mutex::new(None),
            worker: Mutex::new(None),
            sink: None,
        }
    }

    /// Start the delivery worker. Must be called inside a tokio runtime.
    pub fn spawn(settings: &AlertSettings, sink: Arc<ResilientSink>) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = tokio::spawn(deliver_alerts(rx, sink.clone()));

        AlertDispatcher {
            max_per_window: settings.max_per_window,
            window: Duration::from_secs(settings.window_secs),
            rate: Mutex::new(RateWindow {
                started: Instant::now(),
                count: 0,
            }),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            sink: Some(sink),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// The webhook sink, for dead-letter replay.
    pub fn sink(&self) -> Option<&Arc<ResilientSink>> {
        self.sink.as_ref()
    }

    pub fn submit(&self, event: &TelemetryEvent) -> Result<AlertOutcome, AlertError> {
        if !self.is_enabled() {
            return Ok(AlertOutcome::Disabled);
        }
        if !event.decision.is_alertable() {
            return Ok(AlertOutcome::NotAlertable);
        }
        let tx = self.tx.lock().clone().ok_or(AlertError::Closed)?;
        if !self.admit() {
            debug!(request_id = %event.request_id, "Alert rate limited");
            return Ok(AlertOutcome::RateLimited);
        }

        tx.try_send(alert_payload(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AlertError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => AlertError::Closed,
        })?;

        Ok(AlertOutcome::Queued)
    }

    fn admit(&self) -> bool {
        let mut rate = self.rate.lock();
        if rate.started.elapsed() >= self.window {
            rate.started = Instant::now();
            rate.count = 0;
        }
        if rate.count >= self.max_per_window {
            return false;
        }
        rate.count += 1;
        true
    }

    /// Stop accepting alerts and wait for queued ones to be delivered.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Alert worker ended abnormally");
            }
        }
    }
}

fn alert_payload(event: &TelemetryEvent) -> Value {
    let severity = match event.decision {
        Action::Block => "high",
        _ => "medium",
    };

    json!({
        "alert": "policy_decision",
        "severity": severity,
        "timestamp": event.timestamp,
        "request_id": event.request_id,
        "endpoint": event.endpoint,
        "direction": event.direction,
        "decision": event.decision,
        "rule_ids": event.rule_ids,
        "shadow_mode": event.shadow_mode,
    })
}

const ALERT_BATCH: usize = 50;

async fn deliver_alerts(mut rx: mpsc::Receiver<Value>, sink: Arc<ResilientSink>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < ALERT_BATCH {
            match rx.try_recv() {
                Ok(alert) => batch.push(alert),
                Err(_) => break,
            }
        }

        if let Err(e) = sink.send_many(&batch).await {
            warn!(sink = sink.name(), alerts = batch.len(), error = %e, "Alert delivery failed");
        }
    }
    debug!("Alert worker stopped");
}
