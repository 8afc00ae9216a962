//! # Request Coalescing
//!
//! Merges concurrent calls that share a key into a single in-flight execution.
//! Every caller joined to the same execution observes the identical outcome.
//!
//! The pending map only holds weak handles. When every caller of an execution
//! has gone away the execution is dropped and its key cleared, so the next call
//! starts fresh instead of joining an orphan.

use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

struct PendingOperation<T> {
    id: u64,
    outcome: Option<WeakShared<BoxFuture<'static, Result<T>>>>,
}

impl<T> PendingOperation<T> {
    fn new(id: u64, outcome: &SharedOutcome<T>) -> Self {
        Self {
            id,
            outcome: outcome.downgrade(),
        }
    }

    fn upgrade(&self) -> Option<SharedOutcome<T>> {
        self.outcome.as_ref().and_then(WeakShared::upgrade)
    }
}

/// Removes the pending entry once its execution settles or is abandoned
struct PendingGuard<K, T>
where
    K: Eq + Hash,
{
    pending: Arc<DashMap<K, PendingOperation<T>>>,
    key: Option<K>,
    id: u64,
}

impl<K, T> Drop for PendingGuard<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let id = self.id;
            self.pending.remove_if(&key, |_, pending| pending.id == id);
        }
    }
}

/// Deduplicates concurrent identical requests by key
pub struct RequestCoalescer<K, T>
where
    K: Eq + Hash,
{
    pending: Arc<DashMap<K, PendingOperation<T>>>,
    next_id: AtomicU64,
}

impl<K, T> fmt::Debug for RequestCoalescer<K, T>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("in_flight", &self.pending.len())
            .finish()
    }
}

impl<K, T> Default for RequestCoalescer<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> RequestCoalescer<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `operation` under `key`, or join the execution already in flight for it.
    ///
    /// `operation` is only invoked when no execution for `key` is pending, and
    /// never while the pending map is locked. Failures propagate to every joined
    /// caller unchanged.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.join_or_start(key, operation).await
    }

    fn join_or_start<F, Fut>(&self, key: K, operation: F) -> SharedOutcome<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(outcome) = entry.get().upgrade() {
                    debug!(key = ?key, "Joining in-flight request");
                    return outcome;
                }
                // Every caller of the previous execution was dropped
                let (id, outcome) = self.start(key, operation);
                entry.insert(PendingOperation::new(id, &outcome));
                outcome
            }
            Entry::Vacant(entry) => {
                let (id, outcome) = self.start(key, operation);
                entry.insert(PendingOperation::new(id, &outcome));
                outcome
            }
        }
    }

    /// Build the shared execution. `operation` runs on first poll, after the
    /// map entry for `key` has been released.
    fn start<F, Fut>(&self, key: K, operation: F) -> (u64, SharedOutcome<T>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(key = ?key, id = id, "Starting coalesced request");

        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key: Some(key),
            id,
        };
        let outcome = async move {
            let result = operation().await;
            drop(guard);
            result
        }
        .boxed()
        .shared();

        (id, outcome)
    }

    /// Number of keys with an execution in flight
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Whether an execution for `key` is currently in flight
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }
}
