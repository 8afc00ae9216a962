//! # Deadlines
//!
//! Races an operation against a timer. When the timer wins, the caller gets a
//! [`ResilienceError::Timeout`] carrying the label and the configured duration,
//! the operation's future is dropped, and the [`CancellationToken`] handed to the
//! operation is cancelled so work it spawned elsewhere can stop as well.

use crate::config::DeadlineSettings;
use crate::error::{ResilienceError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Run `operation` with a deadline.
///
/// `operation` receives a token that is cancelled if the deadline elapses.
pub async fn with_timeout<F, Fut, T>(operation: F, duration: Duration, label: &str) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let token = CancellationToken::new();
    let work = operation(token.clone());

    match tokio::time::timeout(duration, work).await {
        Ok(result) => result,
        Err(_) => {
            token.cancel();
            warn!(
                label = label,
                timeout_ms = duration.as_millis() as u64,
                "Operation timed out"
            );
            Err(ResilienceError::timeout(label, duration))
        }
    }
}

/// Run an already-built future with a deadline. Dropping it on timeout is the cancellation.
pub async fn with_timeout_future<Fut, T>(future: Fut, duration: Duration, label: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    with_timeout(|_| future, duration, label).await
}

/// Reusable deadline for one dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineWrapper {
    label: String,
    duration: Duration,
}

impl DeadlineWrapper {
    pub fn new(label: impl Into<String>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            duration,
        }
    }

    /// Deadline for `component` as configured, falling back to the default timeout
    pub fn from_settings(component: &str, settings: &DeadlineSettings) -> Self {
        Self::new(component, settings.timeout_for(component))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_timeout(operation, self.duration, &self.label).await
    }
}
