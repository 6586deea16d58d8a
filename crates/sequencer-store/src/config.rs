//! Typed configuration for the sequencer store: documented constants
//! rather than untyped maps. An outer CLI/config layer would deserialize
//! into this with `serde`.

use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on rows per `bulk_insert` statement.
    pub max_batch_size: usize,
    /// How many events `read_events` returns per call when the caller asks
    /// for an unbounded limit internally (a natural default for a
    /// streaming reader).
    pub default_read_limit: usize,
    /// Cutoff age for `mark_lagging_sequencers_offline` polling cadence;
    /// owned by the caller's scheduling loop, not this crate, but recorded
    /// here so a single config struct documents the writer's full knob set.
    pub lagging_sequencer_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_batch_size: 1_000,
            default_read_limit: 1_000,
            lagging_sequencer_poll_interval: Duration::from_secs(5),
        }
    }
}
