//! Cursor futures: one-shot completion signals per cursor,
//! completed by a post-commit hook once the target offset becomes durable.
//! No busy-polling — built directly on `tokio::sync::watch`, the same
//! primitive `errors::shutdown::ShutdownSignal` uses, rather than a spawned
//! notifier actor, since a `watch` channel already gives us "wake every
//! waiter on the latest value" for free.

use domain::{
    request::RequestCounter,
    Timestamp,
};
use tokio::sync::watch;

/// Tracks the pending prehead (largest contiguously-inserted `rc`) as a
/// monotonically advancing cursor.
#[derive(Clone)]
pub struct PendingPreheadCursor {
    tx: std::sync::Arc<watch::Sender<Option<RequestCounter>>>,
    rx: watch::Receiver<Option<RequestCounter>>,
}

impl PendingPreheadCursor {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx: std::sync::Arc::new(tx), rx }
    }

    /// Advances the cursor. Guarantees monotonicity: a call with a value
    /// behind the current one is a no-op.
    pub fn advance(&self, rc: Option<RequestCounter>) {
        self.tx.send_if_modified(|current| match (*current, rc) {
            (Some(c), Some(new)) if new <= c => false,
            (None, None) => false,
            _ => {
                *current = rc;
                true
            },
        });
    }

    pub fn current(&self) -> Option<RequestCounter> {
        *self.rx.borrow()
    }

    /// Resolves once the prehead has advanced to at least `target`.
    pub async fn wait_for(&self, target: RequestCounter) {
        let mut rx = self.rx.clone();
        loop {
            if rx.borrow().is_some_and(|c| c >= target) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for PendingPreheadCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the clean prehead, which also carries the commit timestamp of the
/// request at that cursor (needed by the starting-point calculator).
#[derive(Clone)]
pub struct CleanPreheadCursor {
    tx: std::sync::Arc<watch::Sender<Option<(RequestCounter, Timestamp)>>>,
    rx: watch::Receiver<Option<(RequestCounter, Timestamp)>>,
}

impl CleanPreheadCursor {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx: std::sync::Arc::new(tx), rx }
    }

    pub fn advance(&self, value: Option<(RequestCounter, Timestamp)>) {
        self.tx.send_if_modified(|current| match (*current, value) {
            (Some((c, _)), Some((new, _))) if new <= c => false,
            (None, None) => false,
            _ => {
                *current = value;
                true
            },
        });
    }

    pub fn current(&self) -> Option<(RequestCounter, Timestamp)> {
        *self.rx.borrow()
    }

    pub async fn wait_for(&self, target: RequestCounter) {
        let mut rx = self.rx.clone();
        loop {
            if rx.borrow().is_some_and(|(c, _)| c >= target) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CleanPreheadCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_prehead_never_regresses() {
        let cursor = PendingPreheadCursor::new();
        cursor.advance(Some(RequestCounter(5)));
        cursor.advance(Some(RequestCounter(3)));
        assert_eq!(cursor.current(), Some(RequestCounter(5)));
        cursor.advance(Some(RequestCounter(7)));
        assert_eq!(cursor.current(), Some(RequestCounter(7)));
    }

    #[tokio::test]
    async fn wait_for_resolves_after_advance() {
        let cursor = PendingPreheadCursor::new();
        let waiter = tokio::spawn({
            let cursor = cursor.clone();
            async move {
                cursor.wait_for(RequestCounter(10)).await;
            }
        });
        cursor.advance(Some(RequestCounter(10)));
        waiter.await.unwrap();
    }
}
