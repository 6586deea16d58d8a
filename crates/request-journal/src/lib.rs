//! Request Journal: a per-request state machine with
//! monotonic cursors (`Pending prehead`, `Clean prehead`) that determine the
//! exact recovery point after a crash.

pub mod config;
pub mod cursors;
pub mod errors;
mod journal;
mod keys;

pub use config::Config;
pub use journal::RequestJournal;
