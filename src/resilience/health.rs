//! # Health Monitor
//!
//! Registry of the circuit breakers guarding a process's dependencies, with
//! aggregated health classification for dashboards and alerting.
//!
//! The monitor is an explicit object owned by whatever wires the dependencies
//! together. Clones share the same registry.

use crate::config::{CircuitBreakerSettings, ResilienceConfig};
use crate::constants::health::CRITICAL_OPEN_RATIO;
use crate::resilience::escalation::EscalationHandler;
use crate::resilience::metrics::{CircuitBreakerStatus, FailureDetail, SuccessDetail};
use crate::resilience::{CircuitBreaker, CircuitState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Aggregate classification across every registered breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallHealth {
    /// Every breaker is closed
    Healthy,
    /// Nothing open, at least one breaker testing recovery
    Recovering,
    /// Some breakers open, but fewer than half
    Degraded,
    /// At least half of the breakers are open
    Critical,
}

impl OverallHealth {
    /// Classify from state counts. An empty registry is healthy.
    pub fn classify(total: usize, open: usize, half_open: usize) -> Self {
        if total == 0 {
            return Self::Healthy;
        }
        if open as f64 >= total as f64 * CRITICAL_OPEN_RATIO {
            Self::Critical
        } else if open > 0 {
            Self::Degraded
        } else if half_open > 0 {
            Self::Recovering
        } else {
            Self::Healthy
        }
    }
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Recovering => write!(f, "RECOVERING"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Full status of every registered breaker plus the derived classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: OverallHealth,
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub breakers: BTreeMap<String, CircuitBreakerStatus>,
    pub collected_at: DateTime<Utc>,
}

impl HealthReport {
    fn from_statuses(breakers: BTreeMap<String, CircuitBreakerStatus>) -> Self {
        let mut closed = 0;
        let mut open = 0;
        let mut half_open = 0;
        for status in breakers.values() {
            match status.state {
                CircuitState::Closed => closed += 1,
                CircuitState::Open => open += 1,
                CircuitState::HalfOpen => half_open += 1,
            }
        }
        let total = breakers.len();

        Self {
            overall: OverallHealth::classify(total, open, half_open),
            total,
            closed,
            open,
            half_open,
            breakers,
            collected_at: Utc::now(),
        }
    }

    /// Fraction of breakers able to serve traffic (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.closed + self.half_open) as f64 / self.total as f64
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | Overall: {} | Health: {:.1}%",
            self.total,
            self.closed,
            self.open,
            self.half_open,
            self.overall,
            self.health_score() * 100.0
        )
    }
}

/// Compact entry for a breaker that is not closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerAlert {
    pub name: String,
    pub state: CircuitState,
    pub reopen_count: u32,
    pub escalated: bool,
    pub retry_after_ms: Option<u64>,
    pub last_failure: Option<FailureDetail>,
    pub last_success: Option<SuccessDetail>,
}

impl From<CircuitBreakerStatus> for BreakerAlert {
    fn from(status: CircuitBreakerStatus) -> Self {
        Self {
            name: status.name,
            state: status.state,
            reopen_count: status.reopen_count,
            escalated: status.escalated,
            retry_after_ms: status.retry_after_ms,
            last_failure: status.metrics.last_failure,
            last_success: status.metrics.last_success,
        }
    }
}

/// Registry of named circuit breakers
#[derive(Clone, Default)]
pub struct HealthMonitor {
    /// Circuit breakers by dependency name
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    /// Used by `circuit_breaker` when creating breakers on demand
    settings: CircuitBreakerSettings,

    /// Attached to breakers created on demand
    escalation: Option<Arc<dyn EscalationHandler>>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("breakers", &self.names())
            .field("escalation", &self.escalation.is_some())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor whose on-demand breakers follow the configured per-component settings
    pub fn from_config(config: &ResilienceConfig) -> Self {
        info!(
            component_overrides = config.circuit_breakers.component_configs.len(),
            "Initializing health monitor from configuration"
        );
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            settings: config.circuit_breakers.clone(),
            escalation: None,
        }
    }

    /// Escalation handler attached to breakers created by [`Self::circuit_breaker`]
    pub fn with_escalation_handler(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = Some(handler);
        self
    }

    /// Add `breaker` under `name`, replacing and returning any previous registration
    pub fn register(
        &self,
        name: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
    ) -> Option<Arc<CircuitBreaker>> {
        let name = name.into();
        let mut breakers = self.breakers.write();
        let previous = breakers.insert(name.clone(), breaker);
        if previous.is_some() {
            warn!(component = %name, "Replaced previously registered circuit breaker");
        } else {
            info!(
                component = %name,
                total_circuit_breakers = breakers.len(),
                "Registered circuit breaker"
            );
        }
        previous
    }

    /// Remove the breaker registered under `name`
    pub fn unregister(&self, name: &str) -> bool {
        let mut breakers = self.breakers.write();
        if breakers.remove(name).is_some() {
            info!(
                component = name,
                remaining_count = breakers.len(),
                "Unregistered circuit breaker"
            );
            true
        } else {
            false
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Get or create the breaker for a component
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write();

        // Double-check: another caller might have created it
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        let config = self
            .settings
            .config_for_component(name)
            .to_resilience_config();
        let mut breaker = CircuitBreaker::new(name, config);
        if let Some(handler) = &self.escalation {
            breaker = breaker.with_escalation_handler(Arc::clone(handler));
        }
        let breaker = Arc::new(breaker);
        breakers.insert(name.to_string(), Arc::clone(&breaker));

        info!(
            component = name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Status of every breaker with the overall classification
    pub fn get_status(&self) -> HealthReport {
        let statuses = self
            .breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.status()))
            .collect();
        HealthReport::from_statuses(statuses)
    }

    /// Only the breakers that are not closed, sorted by name
    pub fn get_alerts(&self) -> Vec<BreakerAlert> {
        self.get_status()
            .breakers
            .into_values()
            .filter(|status| status.state != CircuitState::Closed)
            .map(BreakerAlert::from)
            .collect()
    }

    /// Force every registered breaker closed (emergency recovery)
    pub fn reset_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed (emergency recovery)");

        let breakers = self.breakers.read();
        for breaker in breakers.values() {
            breaker.reset();
        }
    }

    /// Check overall health based on circuit breaker states
    pub fn health_score(&self) -> f64 {
        self.get_status().health_score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitBreakerConfig;
    use proptest::prelude::*;

    fn breaker(name: &str) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(name, CircuitBreakerConfig::default()))
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(OverallHealth::classify(0, 0, 0), OverallHealth::Healthy);
        assert_eq!(OverallHealth::classify(3, 0, 0), OverallHealth::Healthy);
        assert_eq!(OverallHealth::classify(3, 0, 1), OverallHealth::Recovering);
        assert_eq!(OverallHealth::classify(3, 1, 1), OverallHealth::Degraded);
        assert_eq!(OverallHealth::classify(4, 2, 0), OverallHealth::Critical);
        assert_eq!(OverallHealth::classify(1, 1, 0), OverallHealth::Critical);
    }

    #[test]
    fn test_last_registration_wins() {
        let monitor = HealthMonitor::new();
        let first = breaker("market_data");
        let second = breaker("market_data");

        assert!(monitor.register("market_data", Arc::clone(&first)).is_none());
        let replaced = monitor.register("market_data", Arc::clone(&second));

        assert!(replaced.is_some_and(|previous| Arc::ptr_eq(&previous, &first)));
        assert!(monitor
            .get("market_data")
            .is_some_and(|current| Arc::ptr_eq(&current, &second)));
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_status_and_alerts() {
        let monitor = HealthMonitor::new();
        monitor.register("statistics", breaker("statistics"));
        let imagery = breaker("imagery");
        monitor.register("imagery", Arc::clone(&imagery));
        monitor.register("market_data", breaker("market_data"));

        let report = monitor.get_status();
        assert_eq!(report.overall, OverallHealth::Healthy);
        assert!(monitor.get_alerts().is_empty());

        imagery.force_open();
        let report = monitor.get_status();
        assert_eq!(report.overall, OverallHealth::Degraded);
        assert_eq!((report.closed, report.open, report.half_open), (2, 1, 0));

        let alerts = monitor.get_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name, "imagery");
        assert_eq!(alerts[0].state, CircuitState::Open);

        monitor.reset_all();
        assert_eq!(monitor.get_status().overall, OverallHealth::Healthy);
    }

    #[test]
    fn test_circuit_breaker_get_or_create_uses_component_config() {
        let mut config = ResilienceConfig::default();
        let mut imagery = config.circuit_breakers.default_config.clone();
        imagery.failure_threshold = 9;
        config
            .circuit_breakers
            .component_configs
            .insert("imagery".to_string(), imagery);

        let monitor = HealthMonitor::from_config(&config);
        let created = monitor.circuit_breaker("imagery");
        let again = monitor.circuit_breaker("imagery");

        assert!(Arc::ptr_eq(&created, &again));
        assert_eq!(created.config().failure_threshold, 9);
        assert_eq!(
            monitor.circuit_breaker("statistics").config().failure_threshold,
            config.circuit_breakers.default_config.failure_threshold
        );
        assert_eq!(monitor.names(), vec!["imagery", "statistics"]);

        assert!(monitor.unregister("imagery"));
        assert!(!monitor.unregister("imagery"));
    }

    #[test]
    fn test_health_score() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.health_score(), 1.0);

        let open = breaker("a");
        monitor.register("a", Arc::clone(&open));
        monitor.register("b", breaker("b"));
        open.force_open();

        assert_eq!(monitor.health_score(), 0.5);
        assert_eq!(monitor.get_status().overall, OverallHealth::Critical);
    }

    proptest! {
        #[test]
        fn prop_classification_matches_definition(
            closed in 0usize..20,
            open in 0usize..20,
            half_open in 0usize..20,
        ) {
            let total = closed + open + half_open;
            let health = OverallHealth::classify(total, open, half_open);

            let critical = total > 0 && (open as f64) / (total as f64) >= 0.5;
            prop_assert_eq!(health == OverallHealth::Critical, critical);
            prop_assert_eq!(health == OverallHealth::Healthy, open == 0 && half_open == 0);
            if health == OverallHealth::Recovering {
                prop_assert!(open == 0 && half_open > 0);
            }
            if health == OverallHealth::Degraded {
                prop_assert!(open > 0 && !critical);
            }
        }
    }
}
