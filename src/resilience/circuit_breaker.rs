//! # Circuit Breaker Implementation
//!
//! Fault isolation for a single dependency. The classic three states apply:
//! Closed (normal operation), Open (failing fast) and Half-Open (a bounded number
//! of trial calls test recovery).
//!
//! Every state change bumps an epoch. Outcomes of calls admitted under an older
//! epoch still update the cumulative metrics but never drive transitions, so a
//! slow call admitted before the breaker opened cannot close or re-open it later.

use crate::error::{ResilienceError, Result};
use crate::logging::{log_admission, log_breaker_event};
use crate::resilience::escalation::EscalationHandler;
use crate::resilience::metrics::{
    CircuitBreakerMetrics, CircuitBreakerStatus, StateTransition, TransitionHistory,
};
use crate::resilience::CircuitBreakerConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - limited calls allowed to test dependency health
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Mutable breaker state; only touched under the breaker's lock
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    reopen_count: u32,
    escalated: bool,
    epoch: u64,
    metrics: CircuitBreakerMetrics,
    history: TransitionHistory,
}

impl BreakerCore {
    fn new(history_limit: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            opened_at: None,
            opened_at_wall: None,
            reopen_count: 0,
            escalated: false,
            epoch: 0,
            metrics: CircuitBreakerMetrics::new(),
            history: TransitionHistory::new(history_limit),
        }
    }

    fn transition(&mut self, to: CircuitState, reason: &str) {
        let from = self.state;
        let at = Utc::now();
        self.state = to;
        self.epoch += 1;
        self.half_open_in_flight = 0;
        self.metrics.last_state_change = Some(at);
        self.history.push(StateTransition {
            from,
            to,
            at,
            reason: reason.to_string(),
        });
    }

    fn open(&mut self, reason: &str) {
        self.opened_at = Some(Instant::now());
        self.opened_at_wall = Some(Utc::now());
        self.consecutive_successes = 0;
        self.transition(CircuitState::Open, reason);
    }

    fn half_open(&mut self) {
        self.consecutive_successes = 0;
        self.transition(CircuitState::HalfOpen, "reset timeout elapsed");
    }

    fn close(&mut self, reason: &str) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.reopen_count = 0;
        self.escalated = false;
        self.opened_at = None;
        self.opened_at_wall = None;
        self.transition(CircuitState::Closed, reason);
    }

    fn release_trial(&mut self) {
        self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
    }

    fn retry_after(&self, reset_timeout: Duration) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(reset_timeout.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }
}

/// Admission granted to one call
#[derive(Debug, Clone, Copy)]
struct Admission {
    epoch: u64,
    trial: bool,
}

/// Gives a half-open trial slot back if the call never reports an outcome
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            settled: false,
        }
    }

    fn settle<T>(mut self, result: &Result<T>, duration: Duration) {
        self.settled = true;
        self.breaker.record_outcome(self.admission, result, duration);
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.settled || !self.admission.trial {
            return;
        }
        let mut core = self.breaker.core.lock();
        if core.epoch == self.admission.epoch && core.state == CircuitState::HalfOpen {
            core.release_trial();
            debug!(
                component = %self.breaker.name,
                in_flight = core.half_open_in_flight,
                "Abandoned trial call released its slot"
            );
        }
    }
}

/// Circuit breaker guarding one dependency
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    core: Mutex<BreakerCore>,

    escalation: Option<Arc<dyn EscalationHandler>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .field("escalation", &self.escalation.is_some())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            half_open_max = config.half_open_max,
            escalate_threshold = config.escalate_threshold,
            "🛡️ Circuit breaker initialized"
        );

        let core = BreakerCore::new(config.history_limit);
        Self {
            name,
            config,
            core: Mutex::new(core),
            escalation: None,
        }
    }

    /// Attach the handler notified when recovery keeps failing
    pub fn with_escalation_handler(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Rejections (`CircuitOpen`, `TrialLimitReached`) are returned without
    /// invoking `operation`. Operation failures are returned unchanged.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;
        let guard = TrialGuard::new(self, admission);

        let started = Instant::now();
        let result = operation().await;
        guard.settle(&result, started.elapsed());

        result
    }

    fn admit(&self) -> Result<Admission> {
        let mut core = self.core.lock();
        core.metrics.total_calls += 1;

        match core.state {
            CircuitState::Closed => Ok(Admission {
                epoch: core.epoch,
                trial: false,
            }),
            CircuitState::Open => {
                let elapsed = core
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or(self.config.reset_timeout);

                if elapsed >= self.config.reset_timeout {
                    core.half_open();
                    core.half_open_in_flight = 1;
                    info!(
                        component = %self.name,
                        success_threshold = self.config.success_threshold,
                        "🟡 Circuit breaker half-open (testing recovery)"
                    );
                    log_breaker_event(
                        &self.name,
                        "half_opened",
                        Some(CircuitState::Open),
                        CircuitState::HalfOpen,
                        None,
                    );
                    Ok(Admission {
                        epoch: core.epoch,
                        trial: true,
                    })
                } else {
                    core.metrics.total_rejected += 1;
                    let retry_after = self.config.reset_timeout - elapsed;
                    log_admission(
                        "circuit_breaker",
                        &self.name,
                        false,
                        Some(&format!("open, retry in {}ms", retry_after.as_millis())),
                    );
                    Err(ResilienceError::CircuitOpen {
                        component: self.name.clone(),
                        retry_after,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if core.half_open_in_flight >= self.config.half_open_max {
                    core.metrics.total_rejected += 1;
                    log_admission(
                        "circuit_breaker",
                        &self.name,
                        false,
                        Some(&format!(
                            "half-open, {} trial slots in use",
                            core.half_open_in_flight
                        )),
                    );
                    return Err(ResilienceError::TrialLimitReached {
                        component: self.name.clone(),
                        max_trials: self.config.half_open_max,
                    });
                }
                core.half_open_in_flight += 1;
                Ok(Admission {
                    epoch: core.epoch,
                    trial: true,
                })
            }
        }
    }

    fn record_outcome<T>(&self, admission: Admission, result: &Result<T>, duration: Duration) {
        let escalation = {
            let mut core = self.core.lock();
            let current = core.epoch == admission.epoch;

            match result {
                Ok(_) => {
                    core.metrics.record_success(duration);
                    if current {
                        self.on_success(&mut core, admission);
                    }
                    None
                }
                Err(error) if self.config.is_ignored(error) => {
                    core.metrics.record_ignored(duration);
                    if current && admission.trial {
                        core.release_trial();
                    }
                    debug!(
                        component = %self.name,
                        class = %error.classification(),
                        "Ignored failure, breaker state unchanged"
                    );
                    None
                }
                Err(error) => {
                    core.metrics
                        .record_failure(error.classification(), error.to_string(), duration);
                    if current {
                        self.on_failure(&mut core, admission, error)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(status) = escalation {
            self.escalate(status);
        }
    }

    fn on_success(&self, core: &mut BreakerCore, admission: Admission) {
        match core.state {
            CircuitState::Closed => {
                core.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if admission.trial => {
                core.release_trial();
                core.consecutive_successes += 1;
                debug!(
                    component = %self.name,
                    consecutive_successes = core.consecutive_successes,
                    success_threshold = self.config.success_threshold,
                    "🟢 Trial call succeeded"
                );
                if core.consecutive_successes >= self.config.success_threshold {
                    core.close("recovered");
                    info!(
                        component = %self.name,
                        total_calls = core.metrics.total_calls,
                        "🟢 Circuit breaker closed (recovered)"
                    );
                    log_breaker_event(
                        &self.name,
                        "closed",
                        Some(CircuitState::HalfOpen),
                        CircuitState::Closed,
                        Some("recovered"),
                    );
                }
            }
            _ => {}
        }
    }

    /// Returns a status snapshot when escalation must fire
    fn on_failure(
        &self,
        core: &mut BreakerCore,
        admission: Admission,
        failure: &ResilienceError,
    ) -> Option<CircuitBreakerStatus> {
        match core.state {
            CircuitState::Closed => {
                core.consecutive_failures += 1;
                warn!(
                    component = %self.name,
                    consecutive_failures = core.consecutive_failures,
                    failure_threshold = self.config.failure_threshold,
                    error = %failure,
                    "🔴 Operation failed"
                );
                if core.consecutive_failures >= self.config.failure_threshold {
                    core.open("failure threshold reached");
                    error!(
                        component = %self.name,
                        consecutive_failures = core.consecutive_failures,
                        reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                        "🔴 Circuit breaker opened (failing fast)"
                    );
                    log_breaker_event(
                        &self.name,
                        "opened",
                        Some(CircuitState::Closed),
                        CircuitState::Open,
                        Some("failure threshold reached"),
                    );
                }
                None
            }
            CircuitState::HalfOpen if admission.trial => {
                core.release_trial();
                core.reopen_count += 1;
                core.metrics.total_reopens += 1;
                core.open("trial call failed");
                error!(
                    component = %self.name,
                    reopen_count = core.reopen_count,
                    error = %failure,
                    "🔴 Circuit breaker re-opened (trial failed)"
                );
                log_breaker_event(
                    &self.name,
                    "reopened",
                    Some(CircuitState::HalfOpen),
                    CircuitState::Open,
                    Some("trial call failed"),
                );

                if core.reopen_count >= self.config.escalate_threshold && !core.escalated {
                    core.escalated = true;
                    Some(self.snapshot(core))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn escalate(&self, status: CircuitBreakerStatus) {
        warn!(
            component = %self.name,
            reopen_count = status.reopen_count,
            "🚨 Escalating circuit breaker"
        );

        let Some(handler) = self.escalation.clone() else {
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(component = %self.name, "No tokio runtime, escalation not delivered");
                return;
            }
        };

        let name = self.name.clone();
        handle.spawn(async move {
            if let Err(e) = handler.on_escalate(&name, &status).await {
                error!(component = %name, error = %e, "Escalation handler failed");
            }
        });
    }

    fn snapshot(&self, core: &BreakerCore) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: core.state,
            consecutive_failures: core.consecutive_failures,
            consecutive_successes: core.consecutive_successes,
            half_open_in_flight: core.half_open_in_flight,
            reopen_count: core.reopen_count,
            escalated: core.escalated,
            opened_at: core.opened_at_wall,
            retry_after_ms: core
                .retry_after(self.config.reset_timeout)
                .map(|d| d.as_millis() as u64),
            metrics: core.metrics.clone(),
            history: core.history.to_vec(),
        }
    }

    /// Full status snapshot
    pub fn status(&self) -> CircuitBreakerStatus {
        let core = self.core.lock();
        self.snapshot(&core)
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.core.lock().metrics.clone()
    }

    /// Force CLOSED and clear every counter (administrative recovery)
    pub fn reset(&self) {
        let mut core = self.core.lock();
        let from = core.state;
        core.metrics = CircuitBreakerMetrics::new();
        core.close("manual reset");

        warn!(component = %self.name, from_state = %from, "🚨 Circuit breaker reset");
        log_breaker_event(
            &self.name,
            "reset",
            Some(from),
            CircuitState::Closed,
            Some("manual reset"),
        );
    }

    /// Force OPEN (for emergency situations); the reset timeout starts now
    pub fn force_open(&self) {
        let mut core = self.core.lock();
        let from = core.state;
        core.open("forced open");

        warn!(component = %self.name, from_state = %from, "🚨 Circuit breaker forced open");
        log_breaker_event(
            &self.name,
            "forced_open",
            Some(from),
            CircuitState::Open,
            None,
        );
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        let core = self.core.lock();
        if core.state != CircuitState::Closed {
            return false;
        }

        if core.metrics.completed_calls() < 10 {
            // Too few calls to determine health
            return true;
        }

        core.metrics.failure_rate() < 0.1
    }
}
