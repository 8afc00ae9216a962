//! # Error Types
//!
//! Every primitive in this crate speaks one error type, [`ResilienceError`].
//! Failures produced by the wrapped work carry an explicit [`FailureClass`] so
//! that circuit breakers can decide whether a failure says anything about the
//! health of the dependency with a typed comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification attached to every failure.
///
/// Breakers are configured with a set of classes they ignore; anything else
/// counts against the dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Dependency unreachable or refusing connections
    Unavailable,
    /// The operation exceeded its deadline
    Timeout,
    /// Remote side throttled the request (protocol-level, not an outage)
    RateLimited,
    /// Remote returned a status code the caller wants to keep distinct
    Status(u16),
    /// A protective primitive refused to run the operation
    Rejected,
    /// Local failure while handling the response
    Internal,
    /// Caller-defined classification
    Custom(String),
}

impl FailureClass {
    /// Map an HTTP-style status code onto a classification.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            408 | 504 => Self::Timeout,
            502 | 503 => Self::Unavailable,
            other => Self::Status(other),
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Status(code) => write!(f, "status_{code}"),
            Self::Rejected => write!(f, "rejected"),
            Self::Internal => write!(f, "internal"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Coarse error taxonomy callers branch on when picking a fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The wrapped work itself failed
    Operation,
    /// A protective primitive refused the call; the work never ran
    Rejection,
    /// The deadline elapsed before the work settled
    Timeout,
}

/// Errors surfaced by resilience primitives and the operations they wrap
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResilienceError {
    /// Wrapped operation failed
    #[error("Upstream failure ({class}): {message}")]
    Upstream { class: FailureClass, message: String },

    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component} (retry after {retry_after:?})")]
    CircuitOpen {
        component: String,
        retry_after: Duration,
    },

    /// Half-open circuit already has the maximum number of trial calls in flight
    #[error("Circuit breaker for {component} is half-open with {max_trials} trial call(s) already in flight")]
    TrialLimitReached { component: String, max_trials: u32 },

    /// Deadline elapsed before the operation settled
    #[error("Operation '{label}' timed out after {duration:?}")]
    Timeout { label: String, duration: Duration },

    /// Rate limiter was stopped while the caller was queued
    #[error("Rate limiter {limiter} stopped before a token was granted")]
    LimiterStopped { limiter: String },

    /// Semaphore was closed while the caller was waiting for a slot
    #[error("Semaphore {name} is closed")]
    SemaphoreClosed { name: String },
}

impl ResilienceError {
    /// Build an operation failure with an explicit classification
    pub fn upstream(class: FailureClass, message: impl Into<String>) -> Self {
        Self::Upstream {
            class,
            message: message.into(),
        }
    }

    /// Build an operation failure from an HTTP-style status code
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::upstream(FailureClass::from_status(status), message)
    }

    pub fn timeout(label: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            label: label.into(),
            duration,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Upstream { .. } => ErrorKind::Operation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. }
            | Self::TrialLimitReached { .. }
            | Self::LimiterStopped { .. }
            | Self::SemaphoreClosed { .. } => ErrorKind::Rejection,
        }
    }

    /// Classification used by circuit breakers when recording this failure
    pub fn classification(&self) -> FailureClass {
        match self {
            Self::Upstream { class, .. } => class.clone(),
            Self::Timeout { .. } => FailureClass::Timeout,
            _ => FailureClass::Rejected,
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.kind() == ErrorKind::Rejection
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
