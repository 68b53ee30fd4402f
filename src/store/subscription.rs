//! Realtime subscription handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to a live realtime feed.
///
/// Delivery stops on [`Subscription::close`] or when the handle is dropped.
/// The store checks the shared `active` flag before every push, so a result
/// computed just before teardown is discarded instead of delivered late.
pub struct Subscription {
    active: Arc<AtomicBool>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a handle from the delivery flag and a teardown action.
    pub fn new(active: Arc<AtomicBool>, cancel: impl FnOnce() + Send + 'static) -> Self {
        active.store(true, Ordering::SeqCst);
        Self {
            active,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Create a handle for a feed driven by a spawned task.
    pub fn from_task(active: Arc<AtomicBool>, task: tokio::task::JoinHandle<()>) -> Self {
        Self::new(active, move || task.abort())
    }

    /// Whether pushes are still being delivered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop delivery. Idempotent.
    pub fn close(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_close_runs_cancel_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut sub = Subscription::new(Arc::new(AtomicBool::new(false)), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        sub.close();
        sub.close();
        assert!(!sub.is_active());
        drop(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes() {
        let flag = Arc::new(AtomicBool::new(false));
        let sub = Subscription::new(Arc::clone(&flag), || {});
        assert!(flag.load(Ordering::SeqCst));
        drop(sub);
        assert!(!flag.load(Ordering::SeqCst));
    }
}
