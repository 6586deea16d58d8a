//! Cursor future for the global offset stream,
//! built the same way `request_journal::cursors` builds its preheads: a
//! `tokio::sync::watch` completed by a post-commit hook, no busy-polling.

use tokio::sync::watch;

#[derive(Clone)]
pub struct GlobalOffsetCursor {
    tx: std::sync::Arc<watch::Sender<Option<u64>>>,
    rx: watch::Receiver<Option<u64>>,
}

impl GlobalOffsetCursor {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx: std::sync::Arc::new(tx), rx }
    }

    /// Advances the cursor. Monotonic: a call with a value behind the
    /// current one is a no-op.
    pub fn advance(&self, offset: u64) {
        self.tx.send_if_modified(|current| match *current {
            Some(c) if offset <= c => false,
            _ => {
                *current = Some(offset);
                true
            },
        });
    }

    pub fn current(&self) -> Option<u64> {
        *self.rx.borrow()
    }

    /// Resolves once the cursor has advanced to at least `target`.
    pub async fn wait_for(&self, target: u64) {
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

impl Default for GlobalOffsetCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_never_regresses() {
        let cursor = GlobalOffsetCursor::new();
        cursor.advance(5);
        cursor.advance(3);
        assert_eq!(cursor.current(), Some(5));
        cursor.advance(7);
        assert_eq!(cursor.current(), Some(7));
    }

    #[tokio::test]
    async fn wait_for_resolves_after_advance() {
        let cursor = GlobalOffsetCursor::new();
        let waiter = tokio::spawn({
            let cursor = cursor.clone();
            async move {
                cursor.wait_for(10).await;
            }
        });
        cursor.advance(10);
        waiter.await.unwrap();
    }
}
