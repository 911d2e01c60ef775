// ABOUTME: Cancellation flag observed at every suspension point of the controller
//
// The Ctrl+C listener only flips the flag. Teardown always runs on the
// controller's own task, never from signal context.

use tokio::sync::watch;

/// Sender side, held by whoever receives the interrupt
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Trip the flag; every clone of the receiver observes it
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver side, cloned into every wait
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A fresh, untripped flag and the handle that trips it
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx })
    }

    /// A flag that can never fire
    pub fn never() -> Self {
        let (_handle, cancel) = Self::new();
        cancel
    }

    /// Non-blocking check
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
