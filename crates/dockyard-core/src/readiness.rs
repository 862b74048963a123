use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Process-wide "environment is ready" flag.
///
/// Cloned handles observe the same flag. It only ever moves from false to
/// true, and only the environment manager sets it.
#[derive(Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns `true` only for the call that flipped the flag.
    pub(crate) fn mark_ready(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Resolve once the flag is set. Never resolves if setup fails.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait for readiness, giving up after `limit`.
    pub async fn wait_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }

    /// Check the flag every `interval` until it is set.
    pub async fn poll_until_ready(&self, interval: Duration) {
        while !self.is_ready() {
            tokio::time::sleep(interval).await;
        }
    }
}
