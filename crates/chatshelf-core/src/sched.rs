//! Timing helpers for refreshes triggered by external changes.
//!
//! - `Debouncer`: run a task once after a quiet period; rescheduling the
//!   same key cancels the earlier run
//! - `Generation`: tickets that tell a finished render whether a newer one
//!   started in the meantime

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
pub struct Debouncer {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless `key` is rescheduled or cancelled
    /// first. Must be called from within a Tokio runtime.
    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|_, h| !h.is_finished());
        if let Some(previous) = tasks.insert(key.clone(), handle) {
            previous.abort();
            debug!(key = %key, "Debounced task rescheduled");
        }
    }

    /// Cancel a pending run. Returns whether one was waiting.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tasks.lock().remove(key) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.tasks
            .lock()
            .get(key)
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

/// Proof that a render started at a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTicket(u64);

/// Monotonic render counter. Results computed for an older ticket are
/// superseded and should be dropped.
#[derive(Debug, Default)]
pub struct Generation {
    current: AtomicU64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self) -> RenderTicket {
        RenderTicket(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: RenderTicket) -> bool {
        self.current.load(Ordering::SeqCst) == ticket.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_runs_once() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        debouncer.schedule("chats_X", Duration::from_millis(300), counting_task(&fired));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.schedule("chats_X", Duration::from_millis(300), counting_task(&fired));
        assert!(debouncer.is_scheduled("chats_X"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_scheduled("chats_X"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        debouncer.schedule("a", Duration::from_millis(50), counting_task(&fired));
        debouncer.schedule("b", Duration::from_millis(50), counting_task(&fired));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        debouncer.schedule("personas", Duration::from_millis(50), counting_task(&fired));
        assert!(debouncer.cancel("personas"));
        assert!(!debouncer.cancel("personas"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_generation_supersedes_older_tickets() {
        let generation = Generation::new();
        let first = generation.advance();
        assert!(generation.is_current(first));

        let second = generation.advance();
        assert!(!generation.is_current(first));
        assert!(generation.is_current(second));
    }
}
