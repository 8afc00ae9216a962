//! # System Constants
//!
//! Default thresholds, intervals and environment variable names shared by the
//! configuration layer and the runtime primitives.

/// Circuit breaker defaults
pub mod circuit_breaker {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
    pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
    pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_HALF_OPEN_MAX: u32 = 1;
    pub const DEFAULT_ESCALATE_THRESHOLD: u32 = 3;
    /// Number of state transitions retained per breaker
    pub const DEFAULT_HISTORY_LIMIT: usize = 20;

    pub const MAX_FAILURE_THRESHOLD: u32 = 100;
    pub const MAX_SUCCESS_THRESHOLD: u32 = 50;
    pub const MAX_RESET_TIMEOUT_MS: u64 = 600_000;
}

/// Token bucket defaults
pub mod rate_limiter {
    pub const DEFAULT_MAX_TOKENS: f64 = 10.0;
    pub const DEFAULT_REFILL_PER_SECOND: f64 = 5.0;
    pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 100;
}

/// Concurrency limit defaults
pub mod semaphore {
    pub const DEFAULT_MAX_CONCURRENT: usize = 4;
}

/// Deadline defaults
pub mod deadline {
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
}

/// Health classification
pub mod health {
    /// Fraction of open breakers at or above which the system is critical
    pub const CRITICAL_OPEN_RATIO: f64 = 0.5;
}

/// Environment variables consulted at startup
pub mod env {
    pub const ENVIRONMENT: &str = "RESILIENCE_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const LOG_FILTER: &str = "RESILIENCE_LOG";
    pub const CONFIG_DIR: &str = "RESILIENCE_CONFIG_DIR";
    /// Prefix for environment overrides, e.g. `RESILIENCE__CIRCUIT_BREAKERS__ENABLED`
    pub const OVERRIDE_PREFIX: &str = "RESILIENCE";
    pub const OVERRIDE_SEPARATOR: &str = "__";
    pub const DEFAULT_ENVIRONMENT: &str = "development";
}

/// Configuration file names
pub mod files {
    pub const BASE_CONFIG: &str = "resilience";
    pub const DEFAULT_CONFIG_DIR: &str = "config";
}
