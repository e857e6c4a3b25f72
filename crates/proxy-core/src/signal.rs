//! One-shot completion signal shared between session tasks.
//!
//! Each pump owns one `CompletionSignal` and fires it when its source is
//! exhausted. Other tasks await it to coordinate teardown. Firing is an atomic
//! compare-and-set, so only the first call has an effect and every later call
//! is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

/// A single-fire, broadcast-once event with no payload.
///
/// Clones share state: firing any clone releases every waiter on every clone.
///
/// # Example
///
/// ```
/// use proxy_core::signal::CompletionSignal;
///
/// let done = CompletionSignal::new();
/// let observer = done.clone();
///
/// assert!(done.fire());
/// assert!(!done.fire()); // second fire is a no-op
/// assert!(observer.is_fired());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

impl CompletionSignal {
    /// Create a new, unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    ///
    /// Returns `true` if this call fired it, `false` if it had already fired.
    pub fn fire(&self) -> bool {
        let first = self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if first {
            self.inner.notify.notify_waiters();
        }

        first
    }

    /// Check whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        loop {
            // Register before checking the flag so a concurrent fire is not missed.
            let notified = self.inner.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}
