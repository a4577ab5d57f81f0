//! Cooperative cancellation for a single transfer

use tokio::sync::watch;

/// Cancellation signal shared between the queue and the backend loop
#[derive(Debug)]
pub struct TransferControl {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // The sender lives in self, so the only way out is a `true` value
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let control = Arc::new(TransferControl::new());
        assert!(!control.is_cancelled());

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.cancelled().await })
        };

        control.cancel();
        waiter.await.unwrap();
        assert!(control.is_cancelled());
    }
}
