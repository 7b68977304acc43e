//! In-flight request deduplication.
//!
//! Two rapid renders of the same character must not turn into two network
//! fetches. The first caller for a key registers its fetch; everyone who
//! arrives before it settles awaits that same fetch and sees the same value
//! or the same error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::api::ApiError;

/// Errors are shared between every waiter of a fetch.
pub type SharedError = Arc<ApiError>;

pub type FetchResult<T> = Result<T, SharedError>;

type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

struct Pending<T> {
    /// Distinguishes a fetch from a later one registered under the same key
    /// after a `forget`.
    id: u64,
    fetch: SharedFetch<T>,
}

/// Forget counters observed when a caller joined or started a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    all: u64,
    key: u64,
}

struct Registry<T> {
    next_id: u64,
    pending: HashMap<String, Pending<T>>,
    /// Bumped by `forget_all`.
    forgotten_all: u64,
    /// Bumped per key by `forget`.
    forgotten: HashMap<String, u64>,
}

impl<T> Registry<T> {
    fn ticket(&self, key: &str) -> Ticket {
        Ticket {
            all: self.forgotten_all,
            key: self.forgotten.get(key).copied().unwrap_or(0),
        }
    }
}

/// Keeps at most one outstanding fetch per key.
pub struct Deduplicator<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                pending: HashMap::new(),
                forgotten_all: 0,
                forgotten: HashMap::new(),
            })),
        }
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the fetch already running for `key`, or start one with
    /// `producer`. The entry is removed when the fetch settles, whether it
    /// succeeded or not, so a failure never wedges the key.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, producer: F) -> FetchResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let (fetch, _) = self.join_or_start(key, producer);
        fetch.await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), then hand a successful
    /// value to `store` unless `key` was forgotten while the fetch ran.
    /// `store` runs under the registry lock, so a concurrent `forget` either
    /// happens before it (and the value is dropped) or after it. It must not
    /// call back into this deduplicator.
    pub async fn fetch_and_store<F, Fut, S>(
        &self,
        key: &str,
        producer: F,
        store: S,
    ) -> FetchResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
        S: FnOnce(&T) + Send,
    {
        let (fetch, ticket) = self.join_or_start(key, producer);
        let result = fetch.await;
        if let Ok(value) = &result {
            let registry = self.registry.lock();
            if registry.ticket(key) == ticket {
                store(value);
            } else {
                debug!(key = key, "Dropping result of a forgotten request");
            }
        }
        result
    }

    fn join_or_start<F, Fut>(&self, key: &str, producer: F) -> (SharedFetch<T>, Ticket)
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        {
            let registry = self.registry.lock();
            if let Some(pending) = registry.pending.get(key) {
                debug!(key = key, "Joining in-flight request");
                return (pending.fetch.clone(), registry.ticket(key));
            }
        }

        // Built outside the lock so a producer may use this deduplicator
        let request = producer();

        let mut registry = self.registry.lock();
        // Someone may have registered while the producer ran
        if let Some(pending) = registry.pending.get(key) {
            debug!(key = key, "Joining in-flight request");
            return (pending.fetch.clone(), registry.ticket(key));
        }

        let id = registry.next_id;
        registry.next_id += 1;

        let owner = Arc::clone(&self.registry);
        let owned_key = key.to_string();
        let fetch = async move {
            let result = request.await.map_err(Arc::new);
            let mut registry = owner.lock();
            if registry.pending.get(&owned_key).is_some_and(|p| p.id == id) {
                registry.pending.remove(&owned_key);
            }
            result
        }
        .boxed()
        .shared();

        registry.pending.insert(
            key.to_string(),
            Pending {
                id,
                fetch: fetch.clone(),
            },
        );
        (fetch, registry.ticket(key))
    }

    /// Drop the pending entry for `key` so the next caller starts a fresh
    /// fetch. Callers already waiting still receive the old result, but
    /// [`fetch_and_store`](Self::fetch_and_store) no longer stores it.
    pub fn forget(&self, key: &str) -> bool {
        let mut registry = self.registry.lock();
        *registry.forgotten.entry(key.to_string()).or_default() += 1;
        registry.pending.remove(key).is_some()
    }

    pub fn forget_all(&self) {
        let mut registry = self.registry.lock();
        registry.forgotten_all += 1;
        registry.pending.clear();
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.registry.lock().pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.registry.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let first_calls = Arc::clone(&calls);
        let first = dedup.get_or_fetch("chats_X", move || {
            first_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = gate.await;
                Ok(7)
            }
        });

        let second_calls = Arc::clone(&calls);
        let second = async {
            // Let the first caller register before joining
            tokio::task::yield_now().await;
            dedup
                .get_or_fetch("chats_X", move || {
                    second_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(99) }
                })
                .await
        };

        let release_later = async {
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            let _ = release.send(());
        };

        let (a, b, ()) = tokio::join!(first, second, release_later);
        assert_eq!(a.expect("first resolves"), 7);
        assert_eq!(b.expect("second resolves"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_waiters_observe_the_same_error() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let (release, gate) = oneshot::channel::<()>();

        let first = dedup.get_or_fetch("personas", move || async move {
            let _ = gate.await;
            Err(ApiError::ServerError("boom".into()))
        });
        let second = async {
            tokio::task::yield_now().await;
            dedup
                .get_or_fetch("personas", || async { Ok(1) })
                .await
        };
        let release_later = async {
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            let _ = release.send(());
        };

        let (a, b, ()) = tokio::join!(first, second, release_later);
        let (a, b) = (a.expect_err("first fails"), b.expect_err("second fails"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_failure_does_not_wedge_key() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let failed = dedup
            .get_or_fetch("characters", || async { Err(ApiError::RateLimited) })
            .await;
        assert!(failed.is_err());
        assert!(!dedup.is_pending("characters"));

        let retried = dedup.get_or_fetch("characters", || async { Ok(3) }).await;
        assert_eq!(retried.expect("second attempt succeeds"), 3);
    }

    #[tokio::test]
    async fn test_forget_starts_fresh_fetch() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let (release, gate) = oneshot::channel::<()>();

        let stale = dedup.get_or_fetch("chats_Y", move || async move {
            let _ = gate.await;
            Ok(1)
        });
        let fresh = async {
            tokio::task::yield_now().await;
            assert!(dedup.forget("chats_Y"));
            let value = dedup.get_or_fetch("chats_Y", || async { Ok(2) }).await;
            let _ = release.send(());
            value
        };

        let (stale, fresh) = tokio::join!(stale, fresh);
        assert_eq!(stale.expect("stale resolves"), 1);
        assert_eq!(fresh.expect("fresh resolves"), 2);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_forgotten_fetch_is_not_stored() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let stored = Mutex::new(Vec::new());
        let (release, gate) = oneshot::channel::<()>();

        let stale = dedup.fetch_and_store(
            "chats_Y",
            move || async move {
                let _ = gate.await;
                Ok(1)
            },
            |v| stored.lock().push(*v),
        );
        let fresh = async {
            tokio::task::yield_now().await;
            dedup.forget("chats_Y");
            let value = dedup
                .fetch_and_store("chats_Y", || async { Ok(2) }, |v| stored.lock().push(*v))
                .await;
            let _ = release.send(());
            value
        };

        let (stale, fresh) = tokio::join!(stale, fresh);
        assert_eq!(stale.expect("stale resolves"), 1);
        assert_eq!(fresh.expect("fresh resolves"), 2);
        assert_eq!(*stored.lock(), vec![2]);
    }

    #[tokio::test]
    async fn test_forget_all_drops_pending_results() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let stored = Mutex::new(None);
        let (release, gate) = oneshot::channel::<()>();

        let stale = dedup.fetch_and_store(
            "personas",
            move || async move {
                let _ = gate.await;
                Ok(1)
            },
            |v| *stored.lock() = Some(*v),
        );
        let clear = async {
            tokio::task::yield_now().await;
            dedup.forget_all();
            let _ = release.send(());
        };

        let (stale, ()) = tokio::join!(stale, clear);
        assert_eq!(stale.expect("waiter still gets the value"), 1);
        assert_eq!(*stored.lock(), None);
    }

    #[tokio::test]
    async fn test_producer_may_use_the_deduplicator() {
        let dedup: Deduplicator<u32> = Deduplicator::new();
        let value = dedup
            .get_or_fetch("characters", || {
                assert!(!dedup.is_pending("characters"));
                async { Ok(5) }
            })
            .await;
        assert_eq!(value.expect("resolves"), 5);
        assert_eq!(dedup.pending_count(), 0);
    }
}
