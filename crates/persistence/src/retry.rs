//! Backoff-retry operator classifying driver errors as retryable or fatal
//!, built on [`runtime::retry`].

use std::time::Duration;

use errors::shutdown::ShutdownSignal;
use runtime::{
    retry::classify_transient,
    RetryStrategy,
    Runtime,
};

/// Default policy for persistence I/O: jittered exponential backoff,
/// starting at 10ms, capped at 5s, up to 10 attempts.
pub const DEFAULT_STRATEGY: RetryStrategy = RetryStrategy::JitteredExponential {
    initial: Duration::from_millis(10),
    max_delay: Duration::from_secs(5),
    max_attempts: 10,
};

/// Retries `op` under [`DEFAULT_STRATEGY`], classifying failures via the
/// shared `ErrorMetadata` taxonomy. Cancellation cuts retry immediately.
pub async fn with_retry<RT, T, F, Fut>(rt: &RT, shutdown: &ShutdownSignal, op: F) -> anyhow::Result<T>
where
    RT: Runtime,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    runtime::retry(rt, shutdown, DEFAULT_STRATEGY, classify_transient, op).await
}
