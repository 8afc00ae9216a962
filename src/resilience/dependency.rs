//! # Guarded Dependencies
//!
//! Bundles the primitives protecting one external dependency and composes them
//! around each call: rate limiter, then concurrency slot, then circuit breaker,
//! then deadline. Timeouts therefore count as breaker failures, while limiter
//! and semaphore waits never do.

use crate::config::ResilienceConfig;
use crate::error::Result;
use crate::resilience::deadline::DeadlineWrapper;
use crate::resilience::health::HealthMonitor;
use crate::resilience::{CircuitBreaker, RateLimiter, Semaphore};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The protective layers wired in front of one dependency
#[derive(Debug, Clone)]
pub struct GuardedDependency {
    name: String,
    rate_limiter: Option<RateLimiter>,
    semaphore: Option<Semaphore>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    deadline: Option<DeadlineWrapper>,
}

impl GuardedDependency {
    /// A dependency with no layers; add them with the `with_*` methods
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rate_limiter: None,
            semaphore: None,
            circuit_breaker: None,
            deadline: None,
        }
    }

    /// Build every configured layer for `name`.
    ///
    /// The breaker comes from `monitor`, so it is registered there and shared with
    /// any other dependency handle of the same name. Rate limiting and concurrency
    /// limits apply only when `name` has its own entry; the deadline always applies,
    /// falling back to the default timeout.
    pub fn from_config(name: &str, config: &ResilienceConfig, monitor: &HealthMonitor) -> Self {
        let mut dependency = Self::new(name)
            .with_deadline(DeadlineWrapper::from_settings(name, &config.deadlines));

        if let Some(limiter) = config.rate_limiters.get(name) {
            dependency =
                dependency.with_rate_limiter(RateLimiter::new(name, limiter.to_resilience_config()));
        }

        if let Some(semaphore) = config.semaphores.get(name) {
            dependency =
                dependency.with_semaphore(Semaphore::new(name, semaphore.to_resilience_config()));
        }

        if config.circuit_breakers.enabled {
            dependency = dependency.with_circuit_breaker(monitor.circuit_breaker(name));
        }

        info!(
            dependency = name,
            rate_limited = dependency.rate_limiter.is_some(),
            concurrency_limited = dependency.semaphore.is_some(),
            circuit_breaker = dependency.circuit_breaker.is_some(),
            "Guarded dependency configured"
        );
        dependency
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_semaphore(mut self, semaphore: Semaphore) -> Self {
        self.semaphore = Some(semaphore);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn with_deadline(mut self, deadline: DeadlineWrapper) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn semaphore(&self) -> Option<&Semaphore> {
        self.semaphore.as_ref()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    pub fn deadline(&self) -> Option<&DeadlineWrapper> {
        self.deadline.as_ref()
    }

    /// Run `operation` behind every configured layer
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await?;
        }

        let _permit = match &self.semaphore {
            Some(semaphore) => Some(semaphore.acquire().await?),
            None => None,
        };

        debug!(dependency = %self.name, "Calling guarded dependency");
        let guarded = || self.within_deadline(operation);
        match &self.circuit_breaker {
            Some(breaker) => breaker.run(guarded).await,
            None => guarded().await,
        }
    }

    async fn within_deadline<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.deadline {
            Some(deadline) => deadline.run(operation).await,
            None => operation(CancellationToken::new()).await,
        }
    }

    /// Stop the limiter's drain task and close the semaphore, rejecting waiters
    pub fn shutdown(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.stop();
        }
        if let Some(semaphore) = &self.semaphore {
            semaphore.close();
        }
        info!(dependency = %self.name, "Guarded dependency shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimiterComponentConfig, SemaphoreComponentConfig};
    use crate::error::ResilienceError;
    use crate::resilience::CircuitState;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_from_config_wires_configured_layers() {
        let mut config = ResilienceConfig::default();
        config.rate_limiters.insert(
            "market_data".to_string(),
            RateLimiterComponentConfig {
                max_tokens: 2.0,
                refill_per_second: 1.0,
                drain_interval_ms: 50,
            },
        );
        config
            .semaphores
            .insert("market_data".to_string(), SemaphoreComponentConfig { max_concurrent: 2 });

        let monitor = HealthMonitor::from_config(&config);
        let market = GuardedDependency::from_config("market_data", &config, &monitor);
        let imagery = GuardedDependency::from_config("imagery", &config, &monitor);

        assert!(market.rate_limiter().is_some());
        assert_eq!(market.semaphore().map(Semaphore::max_concurrent), Some(2));
        assert!(imagery.rate_limiter().is_none());
        assert!(imagery.semaphore().is_none());
        assert_eq!(
            imagery.deadline().map(DeadlineWrapper::duration),
            Some(config.deadlines.timeout_for("imagery"))
        );
        assert_eq!(monitor.names(), vec!["imagery", "market_data"]);

        let value = market.call(|_| async { Ok(11) }).await;
        assert_eq!(value, Ok(11));
        market.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_count_against_the_breaker() {
        let breaker = Arc::new(CircuitBreaker::new(
            "statistics",
            crate::resilience::CircuitBreakerConfig::default().with_failure_threshold(2),
        ));
        let dependency = GuardedDependency::new("statistics")
            .with_circuit_breaker(Arc::clone(&breaker))
            .with_deadline(DeadlineWrapper::new("statistics", Duration::from_millis(100)));

        for _ in 0..2 {
            let result: Result<()> = dependency
                .call(|_| std::future::pending::<Result<()>>())
                .await;
            assert!(result.unwrap_err().is_timeout());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected: Result<()> = dependency.call(|_| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_disabled_breakers_are_not_created() {
        let mut config = ResilienceConfig::default();
        config.circuit_breakers.enabled = false;
        let monitor = HealthMonitor::from_config(&config);

        let dependency = GuardedDependency::from_config("imagery", &config, &monitor);
        assert!(dependency.circuit_breaker().is_none());
        assert!(monitor.is_empty());
    }
}
