//! # Resilience Configuration System
//!
//! File- and environment-sourced configuration for every protected dependency.
//!
//! ## Architecture
//!
//! - **Layered Sources**: `resilience.yaml`, then `resilience.{env}.yaml`, then
//!   `RESILIENCE__*` environment variables
//! - **Per-Component Overrides**: breakers, rate limiters, semaphores and deadlines
//!   are keyed by dependency name with a shared default
//! - **Explicit Validation**: every component is validated before it is handed out
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let breaker_config = manager
//!     .config()
//!     .circuit_breakers
//!     .config_for_component("market_data")
//!     .to_resilience_config();
//! # let _ = breaker_config;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants;
use crate::error::FailureClass;
use crate::resilience::config as runtime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `resilience.yaml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breaker settings
    pub circuit_breakers: CircuitBreakerSettings,

    /// Token bucket limiters by dependency name
    pub rate_limiters: HashMap<String, RateLimiterComponentConfig>,

    /// Concurrency limits by dependency name
    pub semaphores: HashMap<String, SemaphoreComponentConfig>,

    /// Operation deadlines
    pub deadlines: DeadlineSettings,
}

impl ResilienceConfig {
    /// Validate every configured component
    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_breakers.validate()?;

        for (name, limiter) in &self.rate_limiters {
            limiter
                .to_resilience_config()
                .validate()
                .map_err(|e| ConfigurationError::for_component(name.clone(), e))?;
        }

        for (name, semaphore) in &self.semaphores {
            semaphore
                .to_resilience_config()
                .validate()
                .map_err(|e| ConfigurationError::for_component(name.clone(), e))?;
        }

        self.deadlines.validate()
    }

    /// Every dependency name mentioned anywhere in the configuration, sorted
    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .component_configs
            .keys()
            .chain(self.rate_limiters.keys())
            .chain(self.semaphores.keys())
            .chain(self.deadlines.component_timeouts_ms.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Circuit breaker section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Whether circuit breakers are enabled globally
    pub enabled: bool,

    /// Default configuration for breakers without a specific entry
    pub default_config: CircuitBreakerComponentConfig,

    /// Specific configurations for named components
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl CircuitBreakerSettings {
    /// Get configuration for a specific component
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn validate(&self) -> ConfigResult<()> {
        self.default_config
            .to_resilience_config()
            .validate()
            .map_err(|e| ConfigurationError::for_component("default", e))?;

        for (name, component) in &self.component_configs {
            component
                .to_resilience_config()
                .validate()
                .map_err(|e| ConfigurationError::for_component(name.clone(), e))?;
        }
        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

/// Circuit breaker configuration for a specific component
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Number of successful trials in half-open state to close circuit
    pub success_threshold: u32,

    /// Time to wait in open state before attempting recovery (in milliseconds)
    pub reset_timeout_ms: u64,

    /// Concurrent trial calls allowed while half-open
    pub half_open_max: u32,

    /// Reopenings before the escalation hook fires
    pub escalate_threshold: u32,

    /// Failure classes that never count against the breaker
    pub ignored_classes: Vec<FailureClass>,

    /// Transitions retained in status history
    pub history_limit: usize,
}

impl CircuitBreakerComponentConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> runtime::CircuitBreakerConfig {
        runtime::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            half_open_max: self.half_open_max,
            ignored_classes: self.ignored_classes.iter().cloned().collect(),
            escalate_threshold: self.escalate_threshold,
            history_limit: self.history_limit,
            classifier: None,
        }
    }
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        use constants::circuit_breaker::*;

        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
            half_open_max: DEFAULT_HALF_OPEN_MAX,
            escalate_threshold: DEFAULT_ESCALATE_THRESHOLD,
            ignored_classes: vec![FailureClass::RateLimited, FailureClass::Status(429)],
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Token bucket configuration for a specific component
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimiterComponentConfig {
    pub max_tokens: f64,
    pub refill_per_second: f64,
    pub drain_interval_ms: u64,
}

impl RateLimiterComponentConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> runtime::RateLimiterConfig {
        runtime::RateLimiterConfig {
            max_tokens: self.max_tokens,
            refill_per_second: self.refill_per_second,
            drain_interval: Duration::from_millis(self.drain_interval_ms),
        }
    }
}

impl Default for RateLimiterComponentConfig {
    fn default() -> Self {
        use constants::rate_limiter::*;

        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            refill_per_second: DEFAULT_REFILL_PER_SECOND,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
        }
    }
}

/// Concurrency limit for a specific component
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SemaphoreComponentConfig {
    pub max_concurrent: usize,
}

impl SemaphoreComponentConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> runtime::SemaphoreConfig {
        runtime::SemaphoreConfig {
            max_concurrent: self.max_concurrent,
        }
    }
}

impl Default for SemaphoreComponentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: constants::semaphore::DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Deadline section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadlineSettings {
    pub default_timeout_ms: u64,
    pub component_timeouts_ms: HashMap<String, u64>,
}

impl DeadlineSettings {
    /// Deadline for a specific component, falling back to the default
    pub fn timeout_for(&self, component_name: &str) -> Duration {
        let millis = self
            .component_timeouts_ms
            .get(component_name)
            .copied()
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(millis)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "deadlines.default_timeout_ms",
                "0",
                "must be greater than 0",
            ));
        }

        for (name, millis) in &self.component_timeouts_ms {
            if *millis == 0 {
                return Err(ConfigurationError::for_component(
                    name.clone(),
                    ConfigurationError::invalid_value(
                        "deadlines.component_timeouts_ms",
                        "0",
                        "must be greater than 0",
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl Default for DeadlineSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: constants::deadline::DEFAULT_TIMEOUT_MS,
            component_timeouts_ms: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResilienceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.circuit_breakers.enabled);
        assert!(config.component_names().is_empty());
    }

    #[test]
    fn test_component_config_falls_back_to_default() {
        let mut config = ResilienceConfig::default();
        config.circuit_breakers.component_configs.insert(
            "market_data".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 3,
                reset_timeout_ms: 15_000,
                ..Default::default()
            },
        );

        let market = config
            .circuit_breakers
            .config_for_component("market_data")
            .to_resilience_config();
        assert_eq!(market.failure_threshold, 3);
        assert_eq!(market.reset_timeout, Duration::from_secs(15));
        assert!(market.ignored_classes.contains(&FailureClass::RateLimited));

        let unknown = config.circuit_breakers.config_for_component("imagery");
        assert_eq!(unknown, config.circuit_breakers.default_config);
    }

    #[test]
    fn test_invalid_component_is_reported_by_name() {
        let mut config = ResilienceConfig::default();
        config.rate_limiters.insert(
            "statistics".to_string(),
            RateLimiterComponentConfig {
                refill_per_second: 0.0,
                ..Default::default()
            },
        );

        let error = config.validate().unwrap_err();
        assert!(
            matches!(error, ConfigurationError::InvalidComponent { ref component, .. } if component == "statistics")
        );
    }

    #[test]
    fn test_deadline_lookup() {
        let mut deadlines = DeadlineSettings::default();
        deadlines
            .component_timeouts_ms
            .insert("imagery".to_string(), 2_500);

        assert_eq!(deadlines.timeout_for("imagery"), Duration::from_millis(2_500));
        assert_eq!(
            deadlines.timeout_for("market_data"),
            Duration::from_millis(constants::deadline::DEFAULT_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_component_names_are_deduplicated() {
        let mut config = ResilienceConfig::default();
        config
            .semaphores
            .insert("imagery".to_string(), SemaphoreComponentConfig::default());
        config
            .rate_limiters
            .insert("imagery".to_string(), RateLimiterComponentConfig::default());
        config
            .rate_limiters
            .insert("market_data".to_string(), RateLimiterComponentConfig::default());

        assert_eq!(
            config.component_names(),
            vec!["imagery".to_string(), "market_data".to_string()]
        );
    }
}
