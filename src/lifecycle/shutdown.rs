//! Shutdown coordination for the server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Graceful shutdown handle shared by the server, the signal listener and `main`.
///
/// Triggering is sticky: a task that starts waiting after the trigger still
/// observes it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger shutdown. Only the first call notifies waiters.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(waiters = self.tx.receiver_count(), "Shutdown triggered");
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) {
        // Subscribe before checking the flag so a concurrent trigger is not lost.
        let mut rx = self.tx.subscribe();
        if self.is_triggered() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
