use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Counts queued work so callers can wait for a worker to go idle.
///
/// Every accepted item is counted by [`begin`](Self::begin) before it is
/// queued and released by [`finish`](Self::finish) once fully processed,
/// including any follow-up items it queued. Idle therefore means drained
/// to quiescence.
#[derive(Debug, Default)]
pub struct WorkTracker {
    pending: AtomicUsize,
    closed: AtomicBool,
    idle: Notify,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one item. Returns `false` once the tracker is closed.
    pub fn begin(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn finish(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            self.idle.notify_waiters();
        }
    }

    /// Stop accepting new items.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Forget every outstanding item and wake waiters.
    pub fn abandon(&self) {
        self.pending.store(0, Ordering::Release);
        self.idle.notify_waiters();
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Resolve once no item is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}
