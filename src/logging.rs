//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and a JSON
//! log file, so breaker transitions and escalations can be correlated after the fact.

use crate::constants::env as env_vars;
use crate::resilience::CircuitState;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging, writing JSON logs under `log/`
pub fn init_structured_logging() {
    init_structured_logging_in(Path::new("log"));
}

/// Initialize structured logging with an explicit log directory.
///
/// Only the first call has an effect. An already-installed global subscriber
/// is left in place.
pub fn init_structured_logging_in(log_dir: &Path) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = get_log_filter(&environment);

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path: PathBuf = log_dir.join(&log_filename);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(filter.clone()));

        // File output is best-effort: an unwritable directory degrades to console only
        let file_layer = match std::fs::create_dir_all(log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                // Keep the writer alive for the lifetime of the process
                std::mem::forget(guard);
                Some(
                    fmt::layer()
                        .with_writer(file_writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(EnvFilter::new(filter)),
                )
            }
            Err(_) => None,
        };

        let file_enabled = file_layer.is_some();
        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            file_enabled = file_enabled,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(env_vars::ENVIRONMENT)
        .or_else(|_| std::env::var(env_vars::FALLBACK_ENVIRONMENT))
        .unwrap_or_else(|_| env_vars::DEFAULT_ENVIRONMENT.to_string())
}

/// Filter directive: `RESILIENCE_LOG` wins, otherwise a per-environment default
fn get_log_filter(environment: &str) -> String {
    if let Ok(filter) = std::env::var(env_vars::LOG_FILTER) {
        return filter;
    }
    match environment {
        "production" => "info".to_string(),
        "test" => "warn".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for a circuit breaker event
pub fn log_breaker_event(
    component: &str,
    event: &str,
    from: Option<CircuitState>,
    to: CircuitState,
    details: Option<&str>,
) {
    tracing::info!(
        component = %component,
        event = %event,
        from_state = from.map(|s| s.to_string()),
        to_state = %to,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "BREAKER_EVENT"
    );
}

/// Log structured data for an admission decision (limiter, semaphore, breaker)
pub fn log_admission(primitive: &str, name: &str, admitted: bool, details: Option<&str>) {
    tracing::debug!(
        primitive = %primitive,
        name = %name,
        admitted = admitted,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "ADMISSION"
    );
}
