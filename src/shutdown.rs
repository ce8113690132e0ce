//! Process-wide shutdown signal.
//!
//! One `ShutdownHandle` flips the flag; every clone of `ShutdownSignal` sees it.

use tokio::sync::watch;

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        // send_replace never fails, even with no live receivers
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    /// A signal that never fires. Handy for one-shot runs and tests.
    pub fn never() -> Self {
        // the sender is dropped right away, so `triggered` parks forever
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // sender dropped without triggering: nothing will ever fire
                std::future::pending::<()>().await;
            }
        }
    }
}
