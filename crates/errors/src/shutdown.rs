//! A cooperative cancellation signal, observed by retry loops and
//! long-running workers.
//!
//! Every combinator that retries checks the signal before each attempt and
//! in sleep gaps; once tripped it never resumes retrying and instead
//! surfaces [`ErrorMetadata::shutdown`].

use std::sync::Arc;

use tokio::sync::watch;

use crate::ErrorMetadata;

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Creates a linked (signal, handle) pair. `ShutdownHandle::shutdown` trips
/// the signal observed by every clone of `ShutdownSignal`.
pub fn shutdown_pair() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownHandle { tx: Arc::new(tx) },
        ShutdownSignal { rx },
    )
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    /// `true` once `ShutdownHandle::shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns `Err(shutdown)` if shutdown has already been requested,
    /// otherwise `Ok(())`. Call before every retry attempt.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_shutdown() {
            return Err(ErrorMetadata::shutdown().into());
        }
        Ok(())
    }

    /// Resolves as soon as shutdown is requested; used to race against
    /// sleeps in retry gaps so a cancelled wait returns immediately.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Never trips; useful for tests and one-off scripts that don't need
    /// cooperative cancellation.
    pub fn never() -> Self {
        let (_handle, signal) = shutdown_pair();
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_trips_signal() {
        let (handle, signal) = shutdown_pair();
        assert!(signal.check().is_ok());
        handle.shutdown();
        assert!(signal.check().is_err());
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn wait_for_shutdown_resolves() {
        let (handle, signal) = shutdown_pair();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move {
                signal.wait_for_shutdown().await;
            }
        });
        handle.shutdown();
        waiter.await.unwrap();
    }
}
