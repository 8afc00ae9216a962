//! Integration tests for health monitoring across several dependencies

use async_trait::async_trait;
use resilience_core::config::ConfigManager;
use resilience_core::resilience::{
    CircuitBreakerStatus, CircuitState, EscalationError, EscalationHandler, GuardedDependency,
    HealthMonitor, OverallHealth,
};
use resilience_core::{FailureClass, ResilienceError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, Level};

struct PagerDouble {
    pages: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl EscalationHandler for PagerDouble {
    async fn on_escalate(
        &self,
        name: &str,
        status: &CircuitBreakerStatus,
    ) -> std::result::Result<(), EscalationError> {
        let _ = self.pages.send(format!("{name}:{}", status.reopen_count));
        Ok(())
    }
}

fn repository_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

async fn outage(dependency: &GuardedDependency) -> Result<()> {
    dependency
        .call(|_| async { Err(ResilienceError::upstream(FailureClass::Unavailable, "down")) })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_view_tracks_dependency_outages() -> std::result::Result<(), Box<dyn std::error::Error>>
{
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .try_init();

    info!("🧪 Testing health classification across dependencies");

    let manager =
        ConfigManager::load_from_directory_with_env(Some(repository_config_dir()), "test")?;
    let config = manager.config();
    let monitor = HealthMonitor::from_config(config);

    let market = GuardedDependency::from_config("market_data", config, &monitor);
    let statistics = GuardedDependency::from_config("statistics", config, &monitor);
    let imagery = GuardedDependency::from_config("imagery", config, &monitor);
    let _news = GuardedDependency::from_config("news", config, &monitor);
    assert_eq!(monitor.len(), 4);
    assert_eq!(monitor.get_status().overall, OverallHealth::Healthy);

    // market_data opens after two failures in the test environment
    for _ in 0..2 {
        assert!(outage(&market).await.is_err());
    }
    let report = monitor.get_status();
    assert_eq!(report.overall, OverallHealth::Degraded);
    assert_eq!(report.open, 1);

    // Five failures open statistics too: half the breakers are now open
    for _ in 0..5 {
        assert!(outage(&statistics).await.is_err());
    }
    let report = monitor.get_status();
    assert_eq!(report.overall, OverallHealth::Critical);
    assert_eq!(report.breakers["statistics"].state, CircuitState::Open);

    let alerts = monitor.get_alerts();
    let names: Vec<_> = alerts.iter().map(|alert| alert.name.as_str()).collect();
    assert_eq!(names, vec!["market_data", "statistics"]);
    assert!(alerts.iter().all(|alert| alert.last_failure.is_some()));

    // Imagery keeps working throughout
    assert_eq!(imagery.call(|_| async { Ok(3) }).await, Ok(3));

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["overall"], "CRITICAL");
    assert_eq!(json["breakers"]["market_data"]["state"], "OPEN");

    monitor.reset_all();
    assert_eq!(monitor.get_status().overall, OverallHealth::Healthy);
    assert!(monitor.get_alerts().is_empty());

    info!("✅ {}", monitor.get_status().format_summary());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_monitor_attaches_escalation_to_created_breakers() -> std::result::Result<(), Box<dyn std::error::Error>>
{
    let manager =
        ConfigManager::load_from_directory_with_env(Some(repository_config_dir()), "test")?;
    let (pages, mut received) = mpsc::unbounded_channel();
    let monitor = HealthMonitor::from_config(manager.config())
        .with_escalation_handler(Arc::new(PagerDouble { pages }));

    let market = GuardedDependency::from_config("market_data", manager.config(), &monitor);
    let breaker = monitor.circuit_breaker("market_data");
    let escalate_after = breaker.config().escalate_threshold;
    let reset_timeout = breaker.config().reset_timeout;

    for _ in 0..breaker.config().failure_threshold {
        let _ = outage(&market).await;
    }
    for _ in 0..escalate_after {
        tokio::time::advance(reset_timeout).await;
        let _ = outage(&market).await;
    }

    assert_eq!(received.recv().await, Some(format!("market_data:{escalate_after}")));
    assert!(breaker.status().escalated);

    tokio::time::advance(reset_timeout).await;
    let _ = outage(&market).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(received.try_recv().is_err());
    Ok(())
}
