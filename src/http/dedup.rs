// In-flight request deduplication.
// Concurrent identical calls share one underlying future and its settled result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::trace;

use crate::error::{ClientError, Result};

/// Handle every joined caller awaits.
pub type SharedCall<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Pending<T> {
    id: u64,
    call: SharedCall<T>,
}

struct InFlightInner<T> {
    next_id: u64,
    pending: HashMap<String, Pending<T>>,
}

/// Map of in-flight calls keyed by request identity.
///
/// Each call runs on its own task, so a caller that stops awaiting only
/// detaches itself. The entry is removed once, when the call settles.
pub struct InFlight<T> {
    inner: Arc<Mutex<InFlightInner<T>>>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InFlightInner {
                next_id: 0,
                pending: HashMap::new(),
            })),
        }
    }
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InFlightInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the pending call for `key`, or start one with `factory`.
    pub fn dedupe<F, Fut>(&self, key: &str, factory: F) -> SharedCall<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(existing) = self.joinable(key) {
            return existing;
        }

        // Built outside the lock so the factory may itself call `dedupe`
        let call = factory();

        let mut inner = self.lock();
        if let Some(existing) = inner.pending.get(key) {
            // Lost the race to another caller; the unpolled call is dropped
            trace!(key = %key, "Joining in-flight request");
            return existing.call.clone();
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let map = Arc::clone(&self.inner);
        let owned_key = key.to_string();

        // The task cannot remove its entry before it is inserted: we hold the lock
        let task = tokio::spawn(async move {
            let result = call.await;
            let mut inner = map.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.pending.get(&owned_key).is_some_and(|p| p.id == id) {
                inner.pending.remove(&owned_key);
            }
            result
        });

        let shared = async move {
            task.await
                .unwrap_or_else(|e| Err(ClientError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        inner.pending.insert(
            key.to_string(),
            Pending {
                id,
                call: shared.clone(),
            },
        );
        shared
    }

    fn joinable(&self, key: &str) -> Option<SharedCall<T>> {
        let inner = self.lock();
        let existing = inner.pending.get(key)?;
        trace!(key = %key, "Joining in-flight request");
        Some(existing.call.clone())
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.lock().pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all pending calls. Running calls finish but are no longer joinable.
    pub fn clear(&self) {
        self.lock().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let in_flight: InFlight<u32> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let make = || {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(7)
            }
        };

        let first = in_flight.dedupe("GET /v1/media", make());
        let second = in_flight.dedupe("GET /v1/media", make());
        assert!(in_flight.is_pending("GET /v1/media"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.notify_one();

        assert_eq!(first.await, Ok(7));
        assert_eq!(second.await, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_joined_callers_see_same_error() {
        let in_flight: InFlight<u32> = InFlight::new();
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);

        let first = in_flight.dedupe("k", move || async move {
            g.notified().await;
            Err(ClientError::Timeout)
        });
        let second = in_flight.dedupe("k", || async { Ok(1) });
        gate.notify_one();

        assert_eq!(first.await, Err(ClientError::Timeout));
        assert_eq!(second.await, Err(ClientError::Timeout));
    }

    #[tokio::test]
    async fn test_settled_key_starts_new_call() {
        let in_flight: InFlight<u32> = InFlight::new();
        assert_eq!(in_flight.dedupe("k", || async { Ok(1) }).await, Ok(1));
        assert!(!in_flight.is_pending("k"));
        assert_eq!(in_flight.dedupe("k", || async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_others() {
        let in_flight: InFlight<u32> = InFlight::new();
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);

        let first = in_flight.dedupe("k", move || async move {
            g.notified().await;
            Ok(5)
        });
        let second = in_flight.dedupe("k", || async { Ok(0) });
        drop(first);
        gate.notify_one();

        assert_eq!(second.await, Ok(5));
    }

    #[tokio::test]
    async fn test_factory_may_start_nested_call() {
        let in_flight: InFlight<u32> = InFlight::new();

        let outer = in_flight.dedupe("outer", || {
            let nested = in_flight.dedupe("nested", || async { Ok(2) });
            async move { nested.await.map(|n| n + 1) }
        });

        assert_eq!(outer.await, Ok(3));
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_clear_does_not_remove_newer_entry() {
        let in_flight: InFlight<u32> = InFlight::new();
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);

        let old = in_flight.dedupe("k", move || async move {
            g.notified().await;
            Ok(1)
        });
        in_flight.clear();

        let newer_gate = Arc::new(Notify::new());
        let ng = Arc::clone(&newer_gate);
        let newer = in_flight.dedupe("k", move || async move {
            ng.notified().await;
            Ok(2)
        });

        gate.notify_one();
        assert_eq!(old.await, Ok(1));
        assert!(in_flight.is_pending("k"));

        newer_gate.notify_one();
        assert_eq!(newer.await, Ok(2));
        assert!(!in_flight.is_pending("k"));
    }
}
