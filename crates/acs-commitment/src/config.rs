//! Typed configuration for the ACS Commitment Engine.

use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The domain's commitment interval; ticks fall on every epoch-aligned
    /// multiple.
    pub reconciliation_interval: Duration,
    pub max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { reconciliation_interval: Duration::from_secs(5), max_batch_size: 1_000 }
    }
}
