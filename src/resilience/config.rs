//! # Runtime Configuration
//!
//! Configuration structures and validation for the resilience primitives.
//!
//! These are the runtime shapes (with `Duration`s). File-based configuration in
//! `crate::config` converts into these via `to_resilience_config()`.

use crate::config::ConfigurationError;
use crate::constants;
use crate::error::{FailureClass, ResilienceError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a failure must be ignored by a breaker
pub type FailureClassifier = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Configuration for a single circuit breaker
#[derive(Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Number of consecutive successful trials in half-open state to close circuit
    pub success_threshold: u32,

    /// Time to wait in open state before attempting recovery
    pub reset_timeout: Duration,

    /// Maximum trial calls admitted concurrently while half-open
    pub half_open_max: u32,

    /// Failure classes that never count against the breaker
    pub ignored_classes: HashSet<FailureClass>,

    /// Half-open to open reopenings before the escalation hook fires
    pub escalate_threshold: u32,

    /// Number of state transitions kept in the status history
    pub history_limit: usize,

    /// Extra ignore predicate, consulted in addition to `ignored_classes`
    #[serde(skip)]
    pub classifier: Option<FailureClassifier>,
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("half_open_max", &self.half_open_max)
            .field("ignored_classes", &self.ignored_classes)
            .field("escalate_threshold", &self.escalate_threshold)
            .field("history_limit", &self.history_limit)
            .field("classifier", &self.classifier.is_some())
            .finish()
    }
}

impl CircuitBreakerConfig {
    /// Market data feeds throttle aggressively; recover quickly
    pub fn for_market_data() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(15),
            ..Self::default()
        }
    }

    /// Statistical agency APIs are slow but rarely throttle
    pub fn for_statistics_api() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Imagery backends serve large payloads; allow a couple of parallel trials
    pub fn for_imagery() -> Self {
        Self {
            failure_threshold: 4,
            reset_timeout: Duration::from_secs(45),
            half_open_max: 2,
            ..Self::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_half_open_max(mut self, max: u32) -> Self {
        self.half_open_max = max;
        self
    }

    pub fn with_escalate_threshold(mut self, threshold: u32) -> Self {
        self.escalate_threshold = threshold;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Replace the ignored classification set
    pub fn with_ignored_classes(mut self, classes: impl IntoIterator<Item = FailureClass>) -> Self {
        self.ignored_classes = classes.into_iter().collect();
        self
    }

    /// Install a predicate that marks additional failures as ignored
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Whether `error` must bypass all breaker counters
    pub fn is_ignored(&self, error: &ResilienceError) -> bool {
        if self.ignored_classes.contains(&error.classification()) {
            return true;
        }
        self.classifier
            .as_ref()
            .is_some_and(|classifier| classifier(error))
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        use constants::circuit_breaker::*;

        if self.failure_threshold == 0 || self.failure_threshold > MAX_FAILURE_THRESHOLD {
            return Err(ConfigurationError::invalid_value(
                "failure_threshold",
                self.failure_threshold.to_string(),
                format!("must be between 1 and {MAX_FAILURE_THRESHOLD}"),
            ));
        }

        if self.success_threshold == 0 || self.success_threshold > MAX_SUCCESS_THRESHOLD {
            return Err(ConfigurationError::invalid_value(
                "success_threshold",
                self.success_threshold.to_string(),
                format!("must be between 1 and {MAX_SUCCESS_THRESHOLD}"),
            ));
        }

        if self.reset_timeout.is_zero()
            || self.reset_timeout > Duration::from_millis(MAX_RESET_TIMEOUT_MS)
        {
            return Err(ConfigurationError::invalid_value(
                "reset_timeout",
                format!("{:?}", self.reset_timeout),
                format!("must be greater than 0 and at most {MAX_RESET_TIMEOUT_MS}ms"),
            ));
        }

        if self.half_open_max == 0 {
            return Err(ConfigurationError::invalid_value(
                "half_open_max",
                "0",
                "at least one trial call must be admitted while half-open",
            ));
        }

        if self.escalate_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "escalate_threshold",
                "0",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        use constants::circuit_breaker::*;

        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: Duration::from_millis(DEFAULT_RESET_TIMEOUT_MS),
            half_open_max: DEFAULT_HALF_OPEN_MAX,
            ignored_classes: [FailureClass::RateLimited, FailureClass::Status(429)]
                .into_iter()
                .collect(),
            escalate_threshold: DEFAULT_ESCALATE_THRESHOLD,
            history_limit: DEFAULT_HISTORY_LIMIT,
            classifier: None,
        }
    }
}

/// Configuration for a token bucket rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Bucket capacity (burst size)
    pub max_tokens: f64,

    /// Tokens added per second; fractional rates are honoured
    pub refill_per_second: f64,

    /// How often queued callers are re-evaluated
    pub drain_interval: Duration,
}

impl RateLimiterConfig {
    pub fn new(max_tokens: f64, refill_per_second: f64) -> Self {
        Self {
            max_tokens,
            refill_per_second,
            ..Self::default()
        }
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.max_tokens.is_finite() && self.max_tokens >= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "max_tokens",
                self.max_tokens.to_string(),
                "bucket must hold at least one token",
            ));
        }

        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return Err(ConfigurationError::invalid_value(
                "refill_per_second",
                self.refill_per_second.to_string(),
                "must be a positive number",
            ));
        }

        if self.drain_interval.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "drain_interval",
                "0ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        use constants::rate_limiter::*;

        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            refill_per_second: DEFAULT_REFILL_PER_SECOND,
            drain_interval: Duration::from_millis(DEFAULT_DRAIN_INTERVAL_MS),
        }
    }
}

/// Configuration for a concurrency limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreConfig {
    pub max_concurrent: usize,
}

impl SemaphoreConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_concurrent == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_concurrent",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for SemaphoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent: constants::semaphore::DEFAULT_MAX_CONCURRENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        // Valid config should pass
        let valid_config = CircuitBreakerConfig::default();
        assert!(valid_config.validate().is_ok());

        // Invalid failure threshold
        let mut invalid_config = CircuitBreakerConfig::default().with_failure_threshold(0);
        assert!(invalid_config.validate().is_err());

        // Invalid reset timeout
        invalid_config = CircuitBreakerConfig::default().with_reset_timeout(Duration::ZERO);
        assert!(invalid_config.validate().is_err());

        // Invalid trial limit
        invalid_config = CircuitBreakerConfig::default().with_half_open_max(0);
        assert!(invalid_config.validate().is_err());

        // Presets are valid
        assert!(CircuitBreakerConfig::for_market_data().validate().is_ok());
        assert!(CircuitBreakerConfig::for_statistics_api().validate().is_ok());
        assert!(CircuitBreakerConfig::for_imagery().validate().is_ok());
    }

    #[test]
    fn test_default_ignores_remote_throttling() {
        let config = CircuitBreakerConfig::default();
        assert!(config.is_ignored(&ResilienceError::from_status(429, "slow down")));
        assert!(!config.is_ignored(&ResilienceError::from_status(500, "boom")));
        assert!(!config.is_ignored(&ResilienceError::upstream(
            FailureClass::Unavailable,
            "connection refused"
        )));
    }

    #[test]
    fn test_classifier_extends_ignored_set() {
        let config = CircuitBreakerConfig::default()
            .with_ignored_classes([])
            .with_classifier(|error| matches!(error.classification(), FailureClass::Status(404)));

        assert!(config.is_ignored(&ResilienceError::from_status(404, "missing")));
        assert!(!config.is_ignored(&ResilienceError::from_status(429, "throttled")));
    }

    #[test]
    fn test_rate_limiter_config_validation() {
        assert!(RateLimiterConfig::default().validate().is_ok());
        assert!(RateLimiterConfig::new(2.0, 0.5).validate().is_ok());
        assert!(RateLimiterConfig::new(0.0, 1.0).validate().is_err());
        assert!(RateLimiterConfig::new(2.0, 0.0).validate().is_err());
        assert!(RateLimiterConfig::new(2.0, f64::NAN).validate().is_err());
        assert!(RateLimiterConfig::default()
            .with_drain_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_semaphore_config_validation() {
        assert!(SemaphoreConfig::default().validate().is_ok());
        assert!(SemaphoreConfig { max_concurrent: 0 }.validate().is_err());
    }
}
