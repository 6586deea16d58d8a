//! Deterministic `Runtime` for tests: virtual clock advanced only by
//! `wait`, seeded RNG, tasks spawned directly onto the ambient `tokio`
//! executor (we don't need virtual-time task scheduling for this
//! workspace's tests, only a virtual clock and reproducible randomness).
//! Grounded on `common::runtime::testing::TestRuntime`, trimmed down.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use futures::future::{
    BoxFuture,
    FutureExt,
};
use parking_lot::Mutex;
use rand::{
    RngCore,
    SeedableRng,
};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;

use crate::{
    JoinError,
    Runtime,
    SpawnHandle,
};

#[derive(Clone)]
pub struct TestRuntime {
    inner: Arc<Inner>,
}

struct Inner {
    elapsed_nanos: AtomicU64,
    base_system_time: SystemTime,
    base_instant: tokio::time::Instant,
    rng: Mutex<ChaCha8Rng>,
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                elapsed_nanos: AtomicU64::new(0),
                base_system_time: SystemTime::now(),
                base_instant: tokio::time::Instant::now(),
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            }),
        }
    }

    /// Advances the virtual clock without sleeping the test thread.
    pub fn advance(&self, duration: Duration) {
        self.inner.elapsed_nanos.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }
}

pub struct TestSpawnHandle {
    handle: Option<JoinHandle<()>>,
}

impl SpawnHandle for TestSpawnHandle {
    fn shutdown(&mut self) {
        if let Some(h) = &self.handle {
            h.abort();
        }
    }

    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>> {
        async move {
            let Some(handle) = self.handle.take() else {
                return Ok(());
            };
            match handle.await {
                Ok(()) => Ok(()),
                Err(e) if e.is_cancelled() => Err(JoinError::Canceled),
                Err(e) => Err(JoinError::Panicked(e.to_string())),
            }
        }
        .boxed()
    }
}

#[async_trait]
impl Runtime for TestRuntime {
    fn wait(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            // Yield once so concurrent tasks interleave, then advance the
            // virtual clock instantly rather than sleeping real time.
            tokio::task::yield_now().await;
            inner.elapsed_nanos.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
        })
    }

    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static) -> Box<dyn SpawnHandle> {
        let span = tracing::info_span!("test_spawned_task", task.name = name);
        let handle = tokio::spawn(tracing::Instrument::instrument(f, span));
        Box::new(TestSpawnHandle { handle: Some(handle) })
    }

    fn system_time(&self) -> SystemTime {
        self.inner.base_system_time + Duration::from_nanos(self.inner.elapsed_nanos.load(Ordering::SeqCst))
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        self.inner.base_instant + Duration::from_nanos(self.inner.elapsed_nanos.load(Ordering::SeqCst))
    }

    fn rng(&self) -> Box<dyn RngCore + Send> {
        let mut guard = self.inner.rng.lock();
        let mut seed = [0u8; 32];
        guard.fill_bytes(&mut seed);
        Box::new(ChaCha8Rng::from_seed(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_advances_virtual_clock_without_sleeping() {
        let rt = TestRuntime::new();
        let before = rt.monotonic_now();
        rt.wait(Duration::from_secs(3600)).await;
        let after = rt.monotonic_now();
        assert_eq!(after - before, Duration::from_secs(3600));
    }

    #[test]
    fn same_seed_is_deterministic() {
        let a = TestRuntime::with_seed(42);
        let b = TestRuntime::with_seed(42);
        let mut ra = a.rng();
        let mut rb = b.rng();
        assert_eq!(ra.next_u64(), rb.next_u64());
    }
}
