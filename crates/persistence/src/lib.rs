//! Persistence Abstraction: the core operates against an
//! abstract key-value-with-transactions persistence interface, not a
//! specific database dialect. Every higher engine
//! (`sequencer-store`, `request-journal`, `acs`, `acs-commitment`) is
//! generic over a `Persistence` handle from this crate, implemented once
//! in-memory (`persistence-memory`, for tests) and once over PostgreSQL
//! (`persistence-postgres`).
//!
//! Exposes transactional read/read-write/write actions, a `box_clone` for
//! cheap handles, and a `set_read_only` knob, over a plain
//! `(table, key) -> JSON value` KV store, since this workspace's four
//! engines each own very different row shapes (members, payloads, events,
//! ACS changes, commitments, ...) and no single schema is pinned here.

use std::fmt;

use async_trait::async_trait;
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;

pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Table names are static strings rather than an enum so engine crates can
/// own their own namespaces without this crate knowing about them.
pub type Table = &'static str;

/// A single row's primary key, serialized to a sortable string by the
/// calling engine (typically a zero-padded/big-endian-hex encoding of the
/// tuple key so `scan_prefix` iterates in key order).
pub type Key = String;

/// Indicates how a row collision during `bulk_insert` should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// If a row with this key already exists, fail the whole batch.
    Error,
    /// If a row with this key already exists, overwrite it.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    /// Number of rows actually written (existing rows under
    /// `ConflictStrategy::Overwrite` count too, matching "update counts ≥ 1
    /// indicate success").
    pub rows_written: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("bulk insert batch failed at row {failed_row_index}: {source}")]
pub struct BatchError {
    pub failed_row_index: usize,
    #[source]
    pub source: anyhow::Error,
}

/// A single logical transaction against the KV store. Dropping a
/// `Transaction` without calling [`Persistence::commit`] rolls it back;
/// implementations must guarantee this (most concretely: the in-memory
/// backend simply never applies buffered writes, the Postgres backend relies
/// on the underlying SQL transaction's implicit rollback on drop).
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, table: Table, key: &str) -> anyhow::Result<Option<JsonValue>>;

    /// All rows whose key starts with `prefix`, in ascending key order.
    async fn scan_prefix(&mut self, table: Table, prefix: &str) -> anyhow::Result<Vec<(Key, JsonValue)>>;

    async fn put(&mut self, table: Table, key: Key, value: JsonValue) -> anyhow::Result<()>;

    async fn delete(&mut self, table: Table, key: &str) -> anyhow::Result<()>;

    /// Deletes every row whose key starts with `prefix`; returns the count
    /// deleted. Used by pruning.
    async fn delete_prefix(&mut self, table: Table, prefix: &str) -> anyhow::Result<usize>;

    /// Lets [`Persistence::commit`] recover the concrete transaction type it
    /// handed out from `begin`, without an unsafe pointer cast.
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any>;
}

/// The persistence handle every engine crate is generic over.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    fn box_clone(&self) -> Box<dyn Persistence>;

    /// True exactly once, for a persistence layer that has never been
    /// written to (used by engines to decide whether bootstrap defaults
    /// need to be seeded).
    async fn is_fresh(&self) -> anyhow::Result<bool>;

    /// Begins a transaction. Transactional reads and read-writes both start
    /// here; a purely read-only caller simply never calls any mutating
    /// method on the returned handle before `commit`.
    async fn begin(&self) -> anyhow::Result<Box<dyn Transaction>>;

    async fn commit(&self, tx: Box<dyn Transaction>) -> anyhow::Result<()>;

    /// A write-only action for callers that don't need to observe the
    /// result of their own write in the same round trip. Implementations may batch/pipeline this more
    /// aggressively than a full read-write transaction.
    async fn write_only(&self, table: Table, key: Key, value: JsonValue) -> anyhow::Result<()> {
        let mut tx = self.begin().await?;
        tx.put(table, key, value).await?;
        self.commit(tx).await
    }

    /// Bulk-insert primitive: a prepared statement fed a sequence of
    /// parameter tuples. Splits into chunks of at most
    /// `max_batch_size` rows so pruning/event-append never construct an
    /// unbounded statement (this expansion's "bulk insert batching knobs").
    async fn bulk_insert(
        &self,
        table: Table,
        rows: Vec<(Key, JsonValue)>,
        conflict: ConflictStrategy,
        max_batch_size: usize,
    ) -> anyhow::Result<BulkInsertOutcome>;

    /// Freezes the persistence layer against new writes without losing
    /// reads (a read-only / maintenance mode). Used by
    /// `sequencer-store::go_offline`/`mark_lagging_sequencers_offline`.
    async fn set_read_only(&self, read_only: bool) -> anyhow::Result<()>;

    fn is_read_only(&self) -> bool;
}

impl Clone for Box<dyn Persistence> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl fmt::Debug for dyn Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn Persistence(read_only={})", self.is_read_only())
    }
}

/// Classifies a raw driver error the way a concrete backend would: this
/// crate only defines the shared transient/fatal vocabulary
/// (`errors::ErrorMetadata`); each backend crate is responsible for mapping
/// its own error types onto it at the boundary.
pub fn transient(short_msg: &'static str, msg: impl Into<String>) -> anyhow::Error {
    ErrorMetadata::transient(short_msg, msg.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_strategy_is_copy_and_eq() {
        assert_eq!(ConflictStrategy::Error, ConflictStrategy::Error);
        assert_ne!(ConflictStrategy::Error, ConflictStrategy::Overwrite);
    }
}
