#![allow(clippy::doc_markdown)] // Allow technical terms like HALF_OPEN, FIFO in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilience Core
//!
//! Concurrency-control and fault-isolation primitives for services that call
//! unreliable, rate-limited external data sources.
//!
//! ## Overview
//!
//! Every outbound call to a dependency can be wrapped in layers that keep the
//! service responsive when that dependency misbehaves:
//!
//! - [`RequestCoalescer`] merges concurrent identical requests into one execution
//! - [`Semaphore`] caps concurrent calls per dependency, admitting waiters FIFO
//! - [`RateLimiter`] paces calls with a token bucket
//! - [`DeadlineWrapper`] bounds how long a caller waits and cancels abandoned work
//! - [`SingletonRefresh`] keeps a shared credential refresh to one in-flight attempt
//! - [`CircuitBreaker`] stops calling a failing dependency, probes recovery and
//!   escalates to an operator when recovery keeps failing
//! - [`HealthMonitor`] aggregates breakers into one health classification
//!
//! ## Error Model
//!
//! All primitives return [`ResilienceError`]. Callers branch on
//! [`ResilienceError::kind`] to tell a genuine upstream failure from a rejection
//! (breaker open, trial slots full) or a timeout, and pick a fallback accordingly.
//! Nothing in this crate retries on its own.
//!
//! ## Module Organization
//!
//! - [`resilience`] - The primitives and their runtime configuration
//! - [`config`] - File and environment based configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging bootstrap
//! - [`constants`] - Defaults and environment variable names
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_core::config::ConfigManager;
//! use resilience_core::resilience::{GuardedDependency, HealthMonitor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! resilience_core::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let monitor = HealthMonitor::from_config(manager.config());
//! let statistics = GuardedDependency::from_config("statistics", manager.config(), &monitor);
//!
//! let body = statistics
//!     .call(|_cancel| async { Ok("gdp series".to_string()) })
//!     .await?;
//!
//! println!("{body} | {}", monitor.get_status().format_summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Time-dependent behaviour is tested against tokio's paused clock:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod resilience;

pub use config::{ConfigManager, ConfigurationError, ResilienceConfig};
pub use error::{ErrorKind, FailureClass, ResilienceError, Result};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, DeadlineWrapper, GuardedDependency,
    HealthMonitor, OverallHealth, RateLimiter, RequestCoalescer, Semaphore, SingletonRefresh,
};
