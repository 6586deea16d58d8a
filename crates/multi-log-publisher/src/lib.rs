//! Multi-Log Publisher: fan-in of
//! per-domain logs to a global offset stream with deduplication.

pub mod config;
mod cursor;
pub mod errors;
mod keys;
pub mod metrics;
mod publisher;

pub use config::Config;
pub use cursor::GlobalOffsetCursor;
pub use publisher::{
    LogRecord,
    MultiLogPublisher,
};
