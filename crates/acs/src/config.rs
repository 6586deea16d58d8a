//! Typed configuration for the Active Contract Store.

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on rows per `bulk_insert`/prune statement, matching
    /// `sequencer_store::config::Config::max_batch_size`.
    pub max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_batch_size: 1_000 }
    }
}
