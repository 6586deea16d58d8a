//! Sequencer Store: durable, multi-writer log of ordered,
//! timestamped events with member registration, watermark-based HA
//! coordination, payload deduplication, per-member counter checkpoints,
//! acknowledgements, and pruning.

pub mod config;
mod keys;
pub mod metrics;
mod store;

pub use config::Config;
pub use store::SequencerStore;
