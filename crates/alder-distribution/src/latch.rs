//! One-shot latch: a signal that fires once and stays fired.
//!
//! Used for the LIST-DONE edge of the subscription list-and-watch: the
//! registry signals once its initial snapshot is complete, and the
//! distributor blocks on the latch before it starts tracking resource
//! cursors.

use std::pin::pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

/// A one-shot signal. Signaling more than once is a no-op; waiting after the
/// signal returns immediately.
#[derive(Debug, Default)]
pub struct Latch {
    signaled: AtomicBool,
    notify: Notify,
}

impl Latch {
    /// Create an unsignaled latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch, releasing all current and future waiters.
    pub fn signal(&self) {
        if !self.signaled.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Whether the latch has fired.
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Wait until the latch fires.
    pub async fn wait(&self) {
        let mut notified = pin!(self.notify.notified());
        loop {
            if self.is_signaled() {
                return;
            }
            // Arm before re-checking so a concurrent signal cannot slip
            // between the check and the await.
            notified.as_mut().enable();
            if self.is_signaled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }
}
