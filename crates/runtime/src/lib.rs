//! Abstraction over OS-level facilities (wall clock, monotonic clock,
//! spawning, randomness) so the ordering/state-tracking engines can run
//! identically against real `tokio` machinery in production and against a
//! deterministic, virtual-time executor in tests.
//!
//! Exposes just the shape this workspace's engines actually need
//! (`spawn`/`wait`/`system_time`/`monotonic_now`/`rng`) — no rate limiter,
//! no thread-pinning, no task registry beyond what's used here.

use std::{
    future::Future,
    pin::Pin,
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::RngCore;
use uuid::Uuid;

pub mod backoff;
pub mod prod;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backoff::Backoff;
pub use retry::{
    retry,
    RetryStrategy,
};

/// A handle to a spawned task. Dropping it does not cancel the task; call
/// [`SpawnHandle::shutdown`] explicitly.
pub trait SpawnHandle: Send {
    fn shutdown(&mut self);
    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>>;
}

#[derive(thiserror::Error, Debug)]
pub enum JoinError {
    #[error("task canceled")]
    Canceled,
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Per-process instance discriminator for HA sequencer writers. A fresh one is minted once per process lifetime;
/// it is what lets `savePayloads` distinguish "the same writer retrying" from
/// "a different writer racing us" after a fencing handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceDiscriminator(pub Uuid);

impl InstanceDiscriminator {
    pub fn fresh(rt: &impl Runtime) -> Self {
        Self(rt.new_uuid_v4())
    }
}

impl std::fmt::Display for InstanceDiscriminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The runtime abstraction every engine crate in this workspace is generic
/// over. See module docs.
#[async_trait]
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Sleep for `duration`. Implementations must be cancel-safe: dropping
    /// the returned future must not leave background timers running.
    fn wait(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;

    /// Spawn a background task under a human-readable name (used in tracing
    /// spans and panics).
    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static) -> Box<dyn SpawnHandle>;

    /// Possibly-virtualized wall clock. Compare against `UNIX_EPOCH` for a
    /// Unix timestamp.
    fn system_time(&self) -> SystemTime;

    /// Possibly-virtualized monotonic clock, for interval/backoff timing
    /// that must never go backwards even if the wall clock is adjusted.
    fn monotonic_now(&self) -> tokio::time::Instant;

    /// Source of randomness (jitter, UUIDs). Boxed so the trait stays
    /// object-safe-ish for callers that don't want to monomorphize.
    fn rng(&self) -> Box<dyn RngCore + Send>;

    fn new_uuid_v4(&self) -> Uuid {
        let mut rng = self.rng();
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

/// Polls at ≈100ms until `pred` holds or `deadline` elapses.
pub async fn retry_until_true<RT, F, Fut>(
    rt: &RT,
    deadline: Duration,
    mut pred: F,
) -> anyhow::Result<()>
where
    RT: Runtime,
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    const POLL_INTERVAL: Duration = Duration::from_millis(100);
    let start = rt.monotonic_now();
    loop {
        if pred().await {
            return Ok(());
        }
        if rt.monotonic_now().saturating_duration_since(start) >= deadline {
            anyhow::bail!("retryUntilTrue timed out after {:?}", deadline);
        }
        rt.wait(POLL_INTERVAL).await;
    }
}
