//! `tokio`-backed production `Runtime`: real wall clock, real spawning,
//! real randomness.

use std::{
    future::Future,
    pin::Pin,
    time::SystemTime,
};

use async_trait::async_trait;
use futures::future::{
    BoxFuture,
    FutureExt,
};
use rand::{
    RngCore,
    SeedableRng,
};
use tokio::task::JoinHandle;

use crate::{
    JoinError,
    Runtime,
    SpawnHandle,
};

#[derive(Clone, Default)]
pub struct ProdRuntime;

impl ProdRuntime {
    pub fn new() -> Self {
        Self
    }
}

pub struct TokioSpawnHandle {
    handle: Option<JoinHandle<()>>,
}

impl SpawnHandle for TokioSpawnHandle {
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
impl Runtime for ProdRuntime {
    fn wait(&self, duration: std::time::Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static) -> Box<dyn SpawnHandle> {
        let span = tracing::info_span!("spawned_task", task.name = name);
        let handle = tokio::spawn(tracing::Instrument::instrument(f, span));
        Box::new(TokioSpawnHandle { handle: Some(handle) })
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn rng(&self) -> Box<dyn RngCore + Send> {
        Box::new(rand::rngs::StdRng::from_entropy())
    }
}
