//! Per-key in-flight request registry
//!
//! Guarantees at most one running request per cache key. The first caller
//! for a key starts the request; every caller that arrives while it is
//! pending joins the same outcome instead of issuing its own.
//!
//! Started requests are spawned onto the tokio runtime, so they run to
//! completion even if every caller stops waiting. Dropping a [`Joined`]
//! never cancels the underlying request.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type SharedOutcome<V> = Shared<BoxFuture<'static, V>>;

struct Pending<V: Clone> {
    id: u64,
    outcome: SharedOutcome<V>,
}

/// A registry of pending requests keyed by cache key
pub struct InFlightRegistry<V: Clone> {
    pending: Arc<Mutex<HashMap<String, Pending<V>>>>,
    next_id: Arc<AtomicU64>,
}

impl<V: Clone> Clone for InFlightRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<V: Clone> Default for InFlightRegistry<V> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Handle to a pending (or just started) request
pub struct Joined<V: Clone> {
    /// True if this call started the request, false if it joined one
    pub started: bool,
    outcome: SharedOutcome<V>,
}

impl<V> Joined<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Wait for the shared outcome
    pub async fn wait(self) -> V {
        self.outcome.await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V> InFlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.pending).contains_key(key)
    }

    /// Number of keys with a request in flight
    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the request pending for `key`, or start one with `start`
    ///
    /// `start` is only invoked when no request for `key` is pending, and
    /// never while the registry is locked, so it may query the registry
    /// itself. If another caller registers the key while `start` runs, the
    /// future it built is dropped unpolled and that caller's request joined.
    /// Must be called from within a tokio runtime.
    pub fn join_or_start<F, Fut>(&self, key: &str, start: F) -> Joined<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        if let Some(joined) = self.join(key) {
            return joined;
        }

        let fut = start();

        let mut pending = lock(&self.pending);
        if let Some(existing) = pending.get(key) {
            debug!(key = %key, "Joining request registered concurrently");
            return Joined {
                started: false,
                outcome: existing.outcome.clone(),
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outcome = self.tracked(key, id, fut).boxed().shared();
        pending.insert(
            key.to_string(),
            Pending {
                id,
                outcome: outcome.clone(),
            },
        );
        drop(pending);

        debug!(key = %key, "Started in-flight request");
        tokio::spawn(outcome.clone());

        Joined {
            started: true,
            outcome,
        }
    }

    fn join(&self, key: &str) -> Option<Joined<V>> {
        let pending = lock(&self.pending);
        let existing = pending.get(key)?;
        debug!(key = %key, "Joining in-flight request");
        Some(Joined {
            started: false,
            outcome: existing.outcome.clone(),
        })
    }

    /// Start a request for `key` only if none is pending
    ///
    /// Returns false without invoking `start` when a request is already in
    /// flight. The started request runs detached.
    pub fn start_if_idle<F, Fut>(&self, key: &str, start: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        if self.is_pending(key) {
            debug!(key = %key, "Request already in flight, not starting another");
            return false;
        }
        self.join_or_start(key, start).started
    }

    /// Forget every pending request
    ///
    /// Forgotten requests still run to completion; they just can no longer
    /// be joined, and their completion will not disturb newer entries.
    pub fn clear(&self) {
        lock(&self.pending).clear();
    }

    fn tracked<Fut>(&self, key: &str, id: u64, fut: Fut) -> impl Future<Output = V> + Send + 'static
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        async move {
            let outcome = fut.await;
            let mut guard = lock(&pending);
            if guard.get(&key).is_some_and(|p| p.id == id) {
                guard.remove(&key);
            }
            outcome
        }
    }
}
