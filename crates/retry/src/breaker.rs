//! Per-operation circuit breakers
//!
//! One [`CircuitBreakerState`] exists per operation name, created on first
//! use and kept for the executor's lifetime. Failures are counted per call,
//! not per attempt: a call that exhausts its retries counts once.
//!
//! Transitions:
//! - `closed → open` when consecutive failed calls reach the threshold
//! - `open → half-open` once the reset window has elapsed
//! - `half-open → closed` on the next success
//! - `half-open → open` on the next failure

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through
    #[default]
    Closed,
    /// Calls are rejected until the reset window elapses
    Open,
    /// The next call probes whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker bookkeeping for one operation; timestamps are epoch millis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_time: u64,
    pub last_success_time: u64,
    pub next_attempt_time: u64,
}

/// Result of consulting the breaker before a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Reject { retry_in: Duration },
}

/// All breakers owned by one executor
pub(crate) struct BreakerRegistry {
    states: DashMap<String, CircuitBreakerState>,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self { states: DashMap::new(), clock }
    }

    /// Decide whether `operation` may run, moving `open → half-open` when due
    pub(crate) fn check(&self, operation: &str) -> GateDecision {
        let now = self.clock.now_millis();
        let mut entry = self.states.entry(operation.to_string()).or_default();

        if entry.state != CircuitState::Open {
            return GateDecision::Proceed;
        }

        if now < entry.next_attempt_time {
            let retry_in = Duration::from_millis(entry.next_attempt_time - now);
            debug!(operation, retry_in_ms = retry_in.as_millis() as u64, "Circuit breaker rejecting call");
            return GateDecision::Reject { retry_in };
        }

        entry.state = CircuitState::HalfOpen;
        info!(operation, "Circuit breaker half-open, probing");
        GateDecision::Proceed
    }

    pub(crate) fn record_success(&self, operation: &str) {
        let now = self.clock.now_millis();
        let mut entry = self.states.entry(operation.to_string()).or_default();

        if entry.state != CircuitState::Closed {
            info!(operation, previous = %entry.state, "Circuit breaker closed after success");
        }
        entry.state = CircuitState::Closed;
        entry.failures = 0;
        entry.last_success_time = now;
    }

    /// Count a failed call; returns `true` if this failure opened the breaker
    pub(crate) fn record_failure(&self, operation: &str, threshold: u32, reset: Duration) -> bool {
        let now = self.clock.now_millis();
        let mut entry = self.states.entry(operation.to_string()).or_default();

        entry.failures = entry.failures.saturating_add(1);
        entry.last_failure_time = now;

        let should_open = match entry.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => entry.failures >= threshold,
            // Concurrent calls admitted before the breaker opened
            CircuitState::Open => false,
        };

        if should_open {
            entry.state = CircuitState::Open;
            entry.next_attempt_time = now.saturating_add(reset.as_millis() as u64);
            warn!(
                operation,
                failures = entry.failures,
                reset_ms = reset.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
        should_open
    }

    pub(crate) fn get(&self, operation: &str) -> Option<CircuitBreakerState> {
        self.states.get(operation).map(|entry| entry.value().clone())
    }

    /// All breakers, ordered by operation name
    pub(crate) fn snapshot(&self) -> Vec<(String, CircuitBreakerState)> {
        let mut states: Vec<_> =
            self.states.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
