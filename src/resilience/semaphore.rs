//! # Concurrency Limiting
//!
//! Bounds the number of operations in flight against one dependency. Waiters
//! are admitted strictly in arrival order. A slot is released exactly once,
//! when its [`SemaphorePermit`] is dropped, whatever the operation's outcome.

use crate::error::{ResilienceError, Result};
use crate::logging::log_admission;
use crate::resilience::config::SemaphoreConfig;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore as FairSemaphore};
use tracing::debug;

/// FIFO concurrency limiter for a single dependency
#[derive(Debug, Clone)]
pub struct Semaphore {
    name: Arc<str>,
    max_concurrent: usize,
    slots: Arc<FairSemaphore>,
    waiting: Arc<AtomicUsize>,
}

/// A held slot; dropping it releases the slot to the next waiter
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct SemaphorePermit {
    _permit: OwnedSemaphorePermit,
}

/// Keeps the waiting count accurate even if the acquiring future is dropped
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Semaphore {
    pub fn new(name: impl Into<String>, config: SemaphoreConfig) -> Self {
        let name: String = name.into();
        debug!(
            semaphore = %name,
            max_concurrent = config.max_concurrent,
            "Semaphore initialized"
        );
        Self {
            name: Arc::from(name),
            max_concurrent: config.max_concurrent,
            slots: Arc::new(FairSemaphore::new(config.max_concurrent)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Convenience constructor with just a limit
    pub fn with_limit(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self::new(name, SemaphoreConfig { max_concurrent })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for a slot; callers are admitted in arrival order
    pub async fn acquire(&self) -> Result<SemaphorePermit> {
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }

        let _waiting = WaitingGuard::enter(&self.waiting);
        debug!(
            semaphore = %self.name,
            running = self.running(),
            waiting = self.waiting(),
            "Waiting for concurrency slot"
        );

        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map(|permit| SemaphorePermit { _permit: permit })
            .map_err(|_| {
                log_admission("semaphore", &self.name, false, Some("closed"));
                ResilienceError::SemaphoreClosed {
                    name: self.name.to_string(),
                }
            })
    }

    /// Take a slot only if one is free and nobody is queued ahead
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|permit| SemaphorePermit { _permit: permit })
    }

    /// Return a slot; equivalent to dropping the permit
    pub fn release(&self, permit: SemaphorePermit) {
        drop(permit);
    }

    /// Run `operation` while holding a slot
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.acquire().await?;
        operation().await
    }

    /// Operations currently holding a slot
    pub fn running(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.slots.available_permits())
    }

    /// Callers queued for a slot
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Reject all current and future waiters
    pub fn close(&self) {
        debug!(semaphore = %self.name, waiting = self.waiting(), "Semaphore closed");
        self.slots.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, assert_ready_ok, task};

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_concurrent() {
        let semaphore = Semaphore::with_limit("imagery", 3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let semaphore = semaphore.clone();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    semaphore
                        .run(|| async {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            current.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(semaphore.running(), 0);
        assert_eq!(semaphore.waiting(), 0);
    }

    #[tokio::test]
    async fn test_release_promotes_longest_waiting_caller() {
        let semaphore = Semaphore::with_limit("market_data", 1);
        let held = semaphore.acquire().await.unwrap();

        let mut first = task::spawn(semaphore.acquire());
        let mut second = task::spawn(semaphore.acquire());
        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert_eq!(semaphore.waiting(), 2);

        semaphore.release(held);
        assert!(first.is_woken());
        let first_permit = assert_ready_ok!(first.poll());
        assert_pending!(second.poll());
        assert_eq!(semaphore.running(), 1);

        drop(first_permit);
        let _second_permit = assert_ready_ok!(second.poll());
    }

    #[tokio::test]
    async fn test_slot_released_after_failure() {
        let semaphore = Semaphore::with_limit("statistics", 1);

        let result: Result<()> = semaphore
            .run(|| async {
                Err(ResilienceError::upstream(FailureClass::Unavailable, "down"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(semaphore.running(), 0);
        assert!(semaphore.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let semaphore = Semaphore::with_limit("imagery", 1);
        let _held = semaphore.acquire().await.unwrap();

        let mut waiter = task::spawn(semaphore.acquire());
        assert_pending!(waiter.poll());

        semaphore.close();
        let result = assert_ready!(waiter.poll());
        assert!(matches!(result, Err(ResilienceError::SemaphoreClosed { .. })));
    }
}
