//! Typed configuration for the multi-log publisher, matching `sequencer_store::config::Config`.

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on rows per `bulk_insert` statement, matching
    /// `sequencer_store::config::Config::max_batch_size`.
    pub max_batch_size: usize,
    /// How many records `read_from` returns per call when the caller asks
    /// for an unbounded limit internally.
    pub default_read_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_batch_size: 1_000, default_read_limit: 1_000 }
    }
}
