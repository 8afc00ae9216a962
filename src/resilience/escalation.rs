//! # Escalation
//!
//! Outward notification fired once per incident when a breaker keeps failing
//! its recovery trials. Handlers run on their own task; whatever they return,
//! the breaker's state and its callers are unaffected.

use crate::resilience::metrics::CircuitBreakerStatus;
use async_trait::async_trait;
use tracing::error;

/// Failure reported by an escalation handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscalationError {
    #[error("Escalation delivery failed: {0}")]
    Delivery(String),

    #[error("Escalation channel unavailable: {0}")]
    Unavailable(String),
}

/// Receives escalation notifications from circuit breakers
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    /// Notify an operator that `name` has failed `status.reopen_count` recovery attempts
    async fn on_escalate(
        &self,
        name: &str,
        status: &CircuitBreakerStatus,
    ) -> Result<(), EscalationError>;
}

/// Default handler: emits an error-level log event
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEscalationHandler;

#[async_trait]
impl EscalationHandler for LoggingEscalationHandler {
    async fn on_escalate(
        &self,
        name: &str,
        status: &CircuitBreakerStatus,
    ) -> Result<(), EscalationError> {
        error!(
            component = %name,
            reopen_count = status.reopen_count,
            total_failures = status.metrics.total_failures,
            last_failure = status
                .metrics
                .last_failure
                .as_ref()
                .map(|failure| failure.message.as_str()),
            "🚨 Circuit breaker escalated: recovery attempts keep failing"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::metrics::CircuitBreakerMetrics;
    use crate::resilience::CircuitState;

    #[tokio::test]
    async fn test_logging_handler_never_fails() {
        let status = CircuitBreakerStatus {
            name: "market_data".to_string(),
            state: CircuitState::Open,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            reopen_count: 3,
            escalated: true,
            opened_at: None,
            retry_after_ms: Some(30_000),
            metrics: CircuitBreakerMetrics::new(),
            history: Vec::new(),
        };

        let handler = LoggingEscalationHandler;
        assert_eq!(handler.on_escalate("market_data", &status).await, Ok(()));
    }
}
