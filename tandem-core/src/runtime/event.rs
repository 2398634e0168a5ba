//! Async Events
//!
//! `Event` is a binary signal: it is either set or clear, and tasks can wait
//! for it to become set. Unlike a bare `Notify`, a `set` that happens before
//! anyone waits is not lost; the flag stays up until it is taken.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A wakeable binary flag.
#[derive(Debug, Default)]
pub struct Event {
    flag: AtomicBool,
    notify: Notify,
}

impl Event {
    /// Create a cleared event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether the flag is raised.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until the flag is raised. The flag stays raised.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `set` cannot
            // slip between the check and the await.
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the flag is raised, then lower it.
    pub async fn take(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.flag.swap(false, Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// Cancellation flag shared by every node task of one pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    event: Arc<Event>,
}

impl CancelToken {
    /// Create an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.event.set();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.event.is_set()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        self.event.wait().await;
    }
}
