//! One-shot flush latch
//!
//! Marks that a conversation's pre-registration buffer has been replayed into
//! the live inbox. The latch starts closed, opens exactly once, and never
//! closes again. Any number of tasks may wait on it concurrently.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Single-fire, multi-waiter gate
#[derive(Debug, Default)]
pub struct FlushLatch {
    fired: AtomicBool,
    notify: Notify,
}

impl FlushLatch {
    /// Create a closed latch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the latch, waking every current waiter
    ///
    /// Returns `true` only for the call that actually opened it.
    pub fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Whether the latch has been opened
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until the latch is open
    ///
    /// Returns immediately once fired.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so a fire between
            // the check and the await cannot be missed.
            let notified = self.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fires_once() {
        let latch = FlushLatch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.is_fired());
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns_immediately() {
        let latch = FlushLatch::new();
        latch.fire();
        tokio::time::timeout(Duration::from_millis(50), latch.wait())
            .await
            .expect("fired latch must not block");
    }

    #[tokio::test]
    async fn test_wakes_all_waiters() {
        let latch = Arc::new(FlushLatch::new());
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let latch = Arc::clone(&latch);
            waiters.push(tokio::spawn(async move { latch.wait().await }));
        }

        tokio::task::yield_now().await;
        latch.fire();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_blocks_until_fired() {
        let latch = FlushLatch::new();
        let blocked = tokio::time::timeout(Duration::from_millis(20), latch.wait()).await;
        assert!(blocked.is_err());
    }
}
