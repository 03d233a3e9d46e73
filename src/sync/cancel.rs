//! Run-level cancellation
//!
//! A `CancelHandle` flips a watch channel once; every clone of the paired
//! `CancelSignal` observes it, including waits that start afterwards.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

/// The operation was interrupted by cancellation
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Operation cancelled")]
pub struct Cancelled;

/// Sender side of a cancellation pair
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiver side of a cancellation pair
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pending forever if the
    /// handle is dropped without cancelling
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

/// Create a connected handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}
