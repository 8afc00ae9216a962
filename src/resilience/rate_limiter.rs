//! # Token Bucket Rate Limiter
//!
//! Admission control for a rate-limited dependency. Tokens are real-valued and
//! refill lazily from elapsed time, so sub-token-per-second rates are honoured
//! over short intervals. Callers that find the bucket empty queue in FIFO order
//! and are admitted by a periodic drain task.

use crate::error::{ResilienceError, Result};
use crate::logging::log_admission;
use crate::resilience::config::RateLimiterConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bucket contents and the queue of suspended requesters
#[derive(Debug)]
struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
    stopped: bool,
}

impl TokenBucketState {
    fn new(config: &RateLimiterConfig, now: Instant) -> Self {
        Self {
            tokens: config.max_tokens,
            last_refill: now,
            waiters: VecDeque::new(),
            stopped: false,
        }
    }

    fn refill(&mut self, config: &RateLimiterConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_second).min(config.max_tokens);
        self.last_refill = now;
    }

    /// Hand tokens to queued callers in arrival order
    fn grant_waiters(&mut self) -> usize {
        let mut granted = 0;
        while self.tokens >= 1.0 {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            // Callers that gave up do not consume a token
            if waiter.send(()).is_ok() {
                self.tokens -= 1.0;
                granted += 1;
            }
        }
        granted
    }
}

#[derive(Debug)]
struct RateLimiterInner {
    name: String,
    config: RateLimiterConfig,
    state: Mutex<TokenBucketState>,
    drain: Mutex<Option<CancellationToken>>,
}

impl RateLimiterInner {
    fn drain_queue(&self) {
        let mut state = self.state.lock();
        state.refill(&self.config, Instant::now());
        let granted = state.grant_waiters();
        if granted > 0 {
            debug!(
                limiter = %self.name,
                granted = granted,
                still_queued = state.waiters.len(),
                "Drained rate limiter queue"
            );
        }
    }
}

/// Token bucket limiter; clones share the same bucket
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let name = name.into();
        info!(
            limiter = %name,
            max_tokens = config.max_tokens,
            refill_per_second = config.refill_per_second,
            drain_interval_ms = config.drain_interval.as_millis() as u64,
            "Rate limiter initialized"
        );

        let state = TokenBucketState::new(&config, Instant::now());
        Self {
            inner: Arc::new(RateLimiterInner {
                name,
                config,
                state: Mutex::new(state),
                drain: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.config
    }

    /// Consume one token, waiting in FIFO order if none is available
    pub async fn acquire(&self) -> Result<()> {
        let receiver = {
            let mut state = self.inner.state.lock();
            state.refill(&self.inner.config, Instant::now());
            if state.waiters.is_empty() && state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return Ok(());
            }

            // Nothing would ever admit a queued caller
            if state.stopped {
                log_admission(
                    "rate_limiter",
                    &self.inner.name,
                    false,
                    Some("stopped, bucket empty"),
                );
                return Err(self.stopped_error());
            }

            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            debug!(
                limiter = %self.inner.name,
                queued = state.waiters.len(),
                tokens = state.tokens,
                "Rate limited, queueing caller"
            );
            receiver
        };

        self.ensure_drain();
        receiver.await.map_err(|_| self.stopped_error())
    }

    /// Consume a token only if one is available right now and nobody is queued
    pub fn try_acquire(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.refill(&self.inner.config, Instant::now());
        if state.waiters.is_empty() && state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait for a token, then run `operation`
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire().await?;
        operation().await
    }

    /// Start the periodic drain task. No-op if it is already running.
    ///
    /// Re-arms a stopped limiter. Must be called from within a tokio runtime.
    pub fn start_drain(&self) {
        self.spawn_drain(true);
    }

    fn spawn_drain(&self, rearm: bool) {
        let mut drain = self.inner.drain.lock();
        if drain.is_some() {
            return;
        }

        {
            let mut state = self.inner.state.lock();
            if state.stopped && !rearm {
                return;
            }
            state.stopped = false;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(limiter = %self.inner.name, "No tokio runtime, drain not started");
                return;
            }
        };

        let token = CancellationToken::new();
        *drain = Some(token.clone());

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.drain_interval;
        handle.spawn(drain_loop(weak, interval, token));

        debug!(limiter = %self.inner.name, "Rate limiter drain started");
    }

    /// Halt the drain task and release every queued caller with an error.
    ///
    /// Tokens still in the bucket keep being handed out immediately; only callers
    /// that would have to queue are rejected until [`start_drain`](Self::start_drain).
    pub fn stop(&self) {
        let mut drain = self.inner.drain.lock();
        if let Some(token) = drain.take() {
            token.cancel();
        }

        let released = {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            let released = state.waiters.len();
            // Dropping the senders wakes each waiter with `LimiterStopped`
            state.waiters.clear();
            released
        };
        drop(drain);

        info!(
            limiter = %self.inner.name,
            released_waiters = released,
            "Rate limiter stopped"
        );
    }

    pub fn is_draining(&self) -> bool {
        self.inner.drain.lock().is_some()
    }

    /// Tokens currently in the bucket, after refilling
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.inner.state.lock();
        state.refill(&self.inner.config, Instant::now());
        state.tokens
    }

    /// Callers currently queued
    pub fn queued(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    fn ensure_drain(&self) {
        self.spawn_drain(false);
    }

    fn stopped_error(&self) -> ResilienceError {
        ResilienceError::LimiterStopped {
            limiter: self.inner.name.clone(),
        }
    }
}

async fn drain_loop(
    limiter: Weak<RateLimiterInner>,
    interval: std::time::Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                // Limiter dropped: nothing left to drain
                let Some(inner) = limiter.upgrade() else {
                    break;
                };
                inner.drain_queue();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_third_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("market_data", RateLimiterConfig::new(2.0, 0.5));
        limiter.start_drain();

        let start = Instant::now();
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2), "admitted after {waited:?}");
        assert!(waited < Duration::from_millis(2500), "admitted after {waited:?}");

        limiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_admits_in_arrival_order() {
        let limiter = RateLimiter::new("statistics", RateLimiterConfig::new(1.0, 10.0));
        limiter.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let limiter = limiter.clone();
                let order = Arc::clone(&order);
                tokio::spawn(async move {
                    limiter.acquire().await.unwrap();
                    order.lock().push(i);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        limiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_refill_accumulates() {
        let limiter = RateLimiter::new("imagery", RateLimiterConfig::new(1.0, 0.5));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;
        let tokens = limiter.available_tokens();
        assert!((tokens - 0.5).abs() < 1e-9, "tokens = {tokens}");
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_queued_callers() {
        let limiter = RateLimiter::new("market_data", RateLimiterConfig::new(1.0, 0.001));
        limiter.acquire().await.unwrap();

        let mut waiter = task::spawn(limiter.acquire());
        assert_pending!(waiter.poll());
        assert_eq!(limiter.queued(), 1);
        assert!(limiter.is_draining());

        limiter.stop();
        assert!(!limiter.is_draining());
        let result = assert_ready!(waiter.poll());
        assert!(matches!(result, Err(ResilienceError::LimiterStopped { .. })));

        // Callers that would queue are rejected until drained again
        assert!(limiter.acquire().await.is_err());
        assert!(!limiter.is_draining());
        limiter.start_drain();
        assert!(limiter.is_draining());
        assert!(!limiter.try_acquire());
        limiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_limiter_still_hands_out_available_tokens() {
        let limiter = RateLimiter::new("statistics", RateLimiterConfig::new(5.0, 1.0));
        limiter.stop();

        assert_eq!(limiter.available_tokens(), 5.0);
        for _ in 0..4 {
            assert!(limiter.acquire().await.is_ok());
        }
        assert!(limiter.try_acquire());

        // Bucket empty: waiting would never end
        let result = limiter.acquire().await;
        assert!(matches!(result, Err(ResilienceError::LimiterStopped { .. })));
        assert_eq!(limiter.queued(), 0);
        assert!(!limiter.is_draining());

        // Lazy refill still applies after stop
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queueing_does_not_restart_a_stopped_drain() {
        let limiter = RateLimiter::new("imagery", RateLimiterConfig::new(1.0, 0.001));
        limiter.acquire().await.unwrap();
        limiter.stop();

        limiter.ensure_drain();
        assert!(!limiter.is_draining());
        assert!(limiter.acquire().await.is_err());

        limiter.start_drain();
        assert!(limiter.is_draining());
        limiter.stop();
    }

    proptest! {
        #[test]
        fn prop_refill_stays_within_bounds(
            max_tokens in 1.0f64..100.0,
            refill in 0.01f64..50.0,
            start in 0.0f64..100.0,
            elapsed_ms in 0u64..1_000_000,
        ) {
            let config = RateLimiterConfig::new(max_tokens, refill);
            let now = Instant::now();
            let mut state = TokenBucketState::new(&config, now);
            state.tokens = start.min(max_tokens);
            let before = state.tokens;

            state.refill(&config, now + Duration::from_millis(elapsed_ms));

            prop_assert!(state.tokens <= max_tokens);
            prop_assert!(state.tokens >= before);
        }
    }
}
