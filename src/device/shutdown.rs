//! Cooperative shutdown signal
//!
//! Handed to the signal-handling code and to the publisher; nothing about the
//! session is reachable through it.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable one-way shutdown trigger
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown; later calls are no-ops
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only ends once the flag is set
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}
