//! # Circuit Breaker Metrics
//!
//! Cumulative counters, last-outcome details and the bounded transition history
//! kept by every circuit breaker, plus the serializable status snapshot handed to
//! dashboards and to the escalation hook.

use crate::error::FailureClass;
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Most recent counted failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub at: DateTime<Utc>,
    pub class: FailureClass,
    pub message: String,
}

/// Most recent success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessDetail {
    pub at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// One entry of a breaker's state history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Cumulative counters for a single circuit breaker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Every call presented to the breaker, admitted or not
    pub total_calls: u64,

    /// Admitted calls that succeeded
    pub total_success: u64,

    /// Admitted calls that failed with a counted classification
    pub total_failures: u64,

    /// Calls refused without running the operation
    pub total_rejected: u64,

    /// Half-open to open transitions
    pub total_reopens: u64,

    /// Failures whose classification the breaker ignores
    pub total_ignored: u64,

    /// Summed duration of completed operations
    pub total_duration: Duration,

    pub last_failure: Option<FailureDetail>,
    pub last_success: Option<SuccessDetail>,
    pub last_state_change: Option<DateTime<Utc>>,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations that actually ran and settled
    pub fn completed_calls(&self) -> u64 {
        self.total_success + self.total_failures + self.total_ignored
    }

    /// Counted failures over completed calls (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        let completed = self.completed_calls();
        if completed == 0 {
            return 0.0;
        }
        self.total_failures as f64 / completed as f64
    }

    pub fn success_rate(&self) -> f64 {
        let completed = self.completed_calls();
        if completed == 0 {
            return 0.0;
        }
        self.total_success as f64 / completed as f64
    }

    pub fn average_duration(&self) -> Duration {
        let completed = self.completed_calls();
        if completed == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(completed);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub(crate) fn record_success(&mut self, duration: Duration) {
        self.total_success += 1;
        self.total_duration += duration;
        self.last_success = Some(SuccessDetail {
            at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        });
    }

    pub(crate) fn record_failure(&mut self, class: FailureClass, message: String, duration: Duration) {
        self.total_failures += 1;
        self.total_duration += duration;
        self.last_failure = Some(FailureDetail {
            at: Utc::now(),
            class,
            message,
        });
    }

    pub(crate) fn record_ignored(&mut self, duration: Duration) {
        self.total_ignored += 1;
        self.total_duration += duration;
    }
}

/// Bounded, oldest-first history of state transitions
#[derive(Debug, Clone)]
pub(crate) struct TransitionHistory {
    entries: VecDeque<StateTransition>,
    limit: usize,
}

impl TransitionHistory {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    pub(crate) fn push(&mut self, transition: StateTransition) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    pub(crate) fn to_vec(&self) -> Vec<StateTransition> {
        self.entries.iter().cloned().collect()
    }
}

/// Point-in-time view of a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_in_flight: u32,
    /// Reopenings since the breaker last closed
    pub reopen_count: u32,
    pub escalated: bool,
    pub opened_at: Option<DateTime<Utc>>,
    /// Remaining cool-down while open
    pub retry_after_ms: Option<u64>,
    pub metrics: CircuitBreakerMetrics,
    pub history: Vec<StateTransition>,
}

impl CircuitBreakerStatus {
    /// Human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing dependency health",
        }
    }

    /// Format status for logging
    pub fn format_summary(&self) -> String {
        format!(
            "{}: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Reopens: {}",
            self.name,
            self.state_description(),
            self.metrics.total_calls,
            self.metrics.success_rate() * 100.0,
            self.metrics.total_failures,
            self.metrics.total_rejected,
            self.metrics.total_reopens
        )
    }
}
