//! A single retry-with-cancellation combinator: takes a strategy
//! (constant, linear, jittered exponential, one-shot) and a predicate
//! classifying failures, and checks the shutdown signal before each
//! attempt and in every sleep gap.

use std::time::Duration;

use errors::{
    shutdown::ShutdownSignal,
    ErrorMetadataAnyhowExt,
};

use crate::{
    Backoff,
    Runtime,
};

#[derive(Debug, Clone, Copy)]
pub enum RetryStrategy {
    /// Never retry; surface the first failure.
    OneShot,
    /// Sleep the same duration between every attempt, up to `max_attempts`.
    Constant { delay: Duration, max_attempts: u32 },
    /// Sleep `base * attempt_number`, capped at `max_delay`.
    Linear {
        base: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
    /// Jittered exponential backoff (the default for persistence I/O).
    JitteredExponential {
        initial: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
}

impl RetryStrategy {
    fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::OneShot => 1,
            RetryStrategy::Constant { max_attempts, .. }
            | RetryStrategy::Linear { max_attempts, .. }
            | RetryStrategy::JitteredExponential { max_attempts, .. } => *max_attempts,
        }
    }

    fn delay_for(&self, attempt: u32, backoff: &mut Backoff, rng: &mut impl rand::Rng) -> Duration {
        match self {
            RetryStrategy::OneShot => Duration::ZERO,
            RetryStrategy::Constant { delay, .. } => *delay,
            RetryStrategy::Linear { base, max_delay, .. } => {
                std::cmp::min(base.saturating_mul(attempt.max(1)), *max_delay)
            },
            RetryStrategy::JitteredExponential { .. } => backoff.fail(rng),
        }
    }
}

/// Runs `op` until it succeeds, `strategy` is exhausted, `classify` declares
/// the failure fatal, or `shutdown` trips. `classify` returns `true` for
/// retryable failures (typically `err.is_transient()`).
pub async fn retry<RT, T, F, Fut>(
    rt: &RT,
    shutdown: &ShutdownSignal,
    strategy: RetryStrategy,
    classify: impl Fn(&anyhow::Error) -> bool,
    mut op: F,
) -> anyhow::Result<T>
where
    RT: Runtime,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let RetryStrategy::JitteredExponential { initial, max_delay, .. } = strategy else {
        return retry_without_backoff(rt, shutdown, strategy, classify, op).await;
    };
    let mut backoff = Backoff::new(initial, max_delay);
    let mut attempt = 0u32;
    loop {
        shutdown.check()?;
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !classify(&e) || attempt >= strategy.max_attempts() {
                    return Err(e);
                }
                let mut rng = rt.rng();
                let delay = backoff.fail(&mut rng);
                wait_cancellable(rt, shutdown, delay).await?;
            },
        }
    }
}

async fn retry_without_backoff<RT, T, F, Fut>(
    rt: &RT,
    shutdown: &ShutdownSignal,
    strategy: RetryStrategy,
    classify: impl Fn(&anyhow::Error) -> bool,
    mut op: F,
) -> anyhow::Result<T>
where
    RT: Runtime,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
    let mut attempt = 0u32;
    loop {
        shutdown.check()?;
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !classify(&e) || attempt >= strategy.max_attempts() {
                    return Err(e);
                }
                let mut rng = rt.rng();
                let delay = strategy.delay_for(attempt, &mut backoff, &mut rng);
                wait_cancellable(rt, shutdown, delay).await?;
            },
        }
    }
}

async fn wait_cancellable<RT: Runtime>(
    rt: &RT,
    shutdown: &ShutdownSignal,
    delay: Duration,
) -> anyhow::Result<()> {
    if delay.is_zero() {
        return shutdown.check();
    }
    tokio::select! {
        biased;
        _ = shutdown.wait_for_shutdown() => Err(errors::ErrorMetadata::shutdown().into()),
        _ = rt.wait(delay) => Ok(()),
    }
}

/// Classifies by the shared `ErrorMetadata` taxonomy: retry transient
/// errors, never retry anything else.
pub fn classify_transient(err: &anyhow::Error) -> bool {
    err.is_transient()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicU32,
        Ordering,
    };

    use errors::{
        shutdown::shutdown_pair,
        ErrorMetadata,
    };

    use super::*;
    use crate::testing::TestRuntime;

    #[tokio::test]
    async fn one_shot_never_retries() {
        let rt = TestRuntime::new();
        let (_h, signal) = shutdown_pair();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry(
            &rt,
            &signal,
            RetryStrategy::OneShot,
            classify_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ErrorMetadata::transient("t", "boom").into()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let rt = TestRuntime::new();
        let (_h, signal) = shutdown_pair();
        let calls = AtomicU32::new(0);
        let result = retry(
            &rt,
            &signal,
            RetryStrategy::JitteredExponential {
                initial: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_attempts: 10,
            },
            classify_transient,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(ErrorMetadata::transient("t", "boom").into())
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_errors_never_retry() {
        let rt = TestRuntime::new();
        let (_h, signal) = shutdown_pair();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry(
            &rt,
            &signal,
            RetryStrategy::JitteredExponential {
                initial: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_attempts: 10,
            },
            classify_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ErrorMetadata::conflict("c", "nope").into()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_aborts_retry() {
        let rt = TestRuntime::new();
        let (handle, signal) = shutdown_pair();
        handle.shutdown();
        let result: anyhow::Result<()> = retry(
            &rt,
            &signal,
            RetryStrategy::JitteredExponential {
                initial: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_attempts: 10,
            },
            classify_transient,
            || async { Err(ErrorMetadata::transient("t", "boom").into()) },
        )
        .await;
        assert!(result.unwrap_err().is_shutdown());
    }
}
