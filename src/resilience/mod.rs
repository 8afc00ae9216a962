//! # Resilience Module
//!
//! Concurrency control and fault isolation for calls to unreliable external
//! dependencies.
//!
//! ## Architecture
//!
//! - **Request coalescing**: concurrent identical calls share one execution
//! - **Semaphore**: FIFO concurrency limit per dependency
//! - **Rate limiter**: token bucket with a FIFO waiter queue
//! - **Deadlines**: timeouts that cancel the work they abandon
//! - **Singleton refresh**: one in-flight refresh of a shared resource
//! - **Circuit breakers**: fail fast while a dependency is down, probe recovery, escalate
//! - **Health monitor**: registry of breakers with an overall classification
//!
//! Primitives compose by wrapping closures, not by sharing locks:
//!
//! ```rust,no_run
//! use resilience_core::resilience::{
//!     CircuitBreaker, CircuitBreakerConfig, HealthMonitor, RequestCoalescer, Semaphore,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> resilience_core::Result<()> {
//! let monitor = HealthMonitor::new();
//! let breaker = Arc::new(CircuitBreaker::new(
//!     "market_data",
//!     CircuitBreakerConfig::for_market_data(),
//! ));
//! monitor.register("market_data", Arc::clone(&breaker));
//!
//! let quotes: RequestCoalescer<String, f64> = RequestCoalescer::new();
//! let slots = Semaphore::with_limit("market_data", 4);
//!
//! let price = quotes
//!     .run("AAPL".to_string(), move || async move {
//!         slots
//!             .run(|| breaker.run(|| async { Ok(187.2) }))
//!             .await
//!     })
//!     .await?;
//! # let _ = price;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod coalescer;
pub mod config;
pub mod deadline;
pub mod dependency;
pub mod escalation;
pub mod health;
pub mod metrics;
pub mod rate_limiter;
pub mod semaphore;
pub mod singleton;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use coalescer::RequestCoalescer;
pub use config::{CircuitBreakerConfig, FailureClassifier, RateLimiterConfig, SemaphoreConfig};
pub use deadline::{with_timeout, with_timeout_future, DeadlineWrapper};
pub use dependency::GuardedDependency;
pub use escalation::{EscalationError, EscalationHandler, LoggingEscalationHandler};
pub use health::{BreakerAlert, HealthMonitor, HealthReport, OverallHealth};
pub use metrics::{
    CircuitBreakerMetrics, CircuitBreakerStatus, FailureDetail, StateTransition, SuccessDetail,
};
pub use rate_limiter::RateLimiter;
pub use semaphore::{Semaphore, SemaphorePermit};
pub use singleton::SingletonRefresh;
