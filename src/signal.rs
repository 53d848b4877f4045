//! Coalescing wake-up signal.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Single-slot, level-triggered wake-up.
///
/// Any number of [`notify`](Signal::notify) calls collapse into one pending
/// wake-up that stays set until a waiter consumes it, so a notification sent
/// before anyone waits is not lost. [`release`](Signal::release) drops a
/// pending wake-up that no longer reflects reality.
#[derive(Debug, Default)]
pub struct Signal {
    pending: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create a signal with no wake-up pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pending wake-up. Never blocks.
    pub fn notify(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Consume the pending wake-up without waiting. Returns whether one was set.
    pub fn release(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until a wake-up is pending, then consume it.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.release() {
                return;
            }
            notified.await;
        }
    }
}
