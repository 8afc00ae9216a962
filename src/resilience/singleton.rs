//! # Singleton Refresh
//!
//! "Run exactly once concurrently" guard for refreshing one shared resource,
//! such as a shared API credential. Callers arriving while a refresh is in
//! flight join it instead of starting their own.

use crate::error::Result;
use crate::resilience::coalescer::RequestCoalescer;
use std::future::Future;

/// Coalesces concurrent refreshes of a single unkeyed resource
#[derive(Debug)]
pub struct SingletonRefresh<T> {
    name: String,
    slot: RequestCoalescer<(), T>,
}

impl<T> SingletonRefresh<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: RequestCoalescer::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start `operation`, or join the refresh already in flight
    pub async fn refresh<F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let result = self.slot.run((), operation).await;
        if let Err(error) = &result {
            tracing::warn!(resource = %self.name, %error, "Refresh failed");
        }
        result
    }

    pub fn is_refreshing(&self) -> bool {
        self.slot.in_flight() > 0
    }
}
