use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Breaker thresholds, shared by every breaker a manager creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Time since the last failure before an open circuit lets a trial call through
    pub recovery_timeout: Duration,
    /// Upper bound on a single wrapped call
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of one breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Failure of a breaker-guarded call.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("circuit open for {0}")]
    Open(String),

    #[error("call to {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
}

/// Circuit breaker for a single dependency.
///
/// The state lock is only held to decide and to record, never across the
/// wrapped call.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                last_failure: None,
                last_success: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Run `op` through the breaker with the configured timeout.
    ///
    /// An open circuit fails with `CallError::Open` without calling `op`.
    /// A timeout is recorded as a failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CallError::Open(self.name.clone()));
        }

        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(CallError::Inner(e))
            }
            Err(_) => {
                self.record_failure();
                Err(CallError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    /// Decide whether a call may proceed, moving open to half-open once the
    /// recovery timeout has elapsed since the last failure.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = state
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);

                if recovered {
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    info!(breaker = %self.name, "Circuit breaker half-open");
                }
                recovered
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.last_success = Some(Utc::now());

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    info!(breaker = %self.name, "Circuit breaker closed");
                }
            }
            // a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.last_failure_at = Some(Instant::now());
        state.last_failure = Some(Utc::now());

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        consecutive_failures = state.consecutive_failures,
                        "Circuit breaker opened"
                    );
                } else {
                    debug!(
                        breaker = %self.name,
                        consecutive_failures = state.consecutive_failures,
                        "Call failed"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.consecutive_failures += 1;
                state.consecutive_successes = 0;
                warn!(breaker = %self.name, "Circuit breaker reopened after failed trial call");
            }
            CircuitState::Open => {
                state.consecutive_failures += 1;
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();

        CircuitSnapshot {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            last_failure: state.last_failure,
            last_success: state.last_success,
        }
    }
}

/// Owns one breaker per dependency name.
///
/// Each breaker has its own lock, so a failing dependency never blocks
/// calls to another.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreakerManager {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a dependency.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        // Fast path: read lock
        {
            let breakers = self.breakers.read();
            if let Some(breaker) = breakers.get(name) {
                return breaker.clone();
            }
        }

        // Slow path: write lock
        let mut breakers = self.breakers.write();

        // Double-check after acquiring write lock
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }

        let breaker = Arc::new(CircuitBreaker::new(name, self.config));
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Snapshot of every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .breakers
            .read()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
