//! In-memory `Persistence` implementation. Backs unit tests for every
//! engine crate in this workspace without a real database.
//!
//! Transactions buffer their writes locally and apply them atomically (under
//! a single global lock) on commit; dropping an uncommitted transaction
//! discards the buffer, giving the same "drop rolls back" guarantee a SQL
//! backend provides.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use async_trait::async_trait;
use errors::ErrorMetadata;
use parking_lot::Mutex;
use persistence::{
    BatchError,
    BulkInsertOutcome,
    ConflictStrategy,
    Key,
    Persistence,
    Table,
    Transaction,
};
use serde_json::Value as JsonValue;

type Row = (Table, Key);

#[derive(Default)]
struct Store {
    rows: BTreeMap<Row, JsonValue>,
    fresh: bool,
    read_only: bool,
}

#[derive(Clone)]
pub struct MemoryPersistence {
    store: Arc<Mutex<Store>>,
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store { rows: BTreeMap::new(), fresh: true, read_only: false })),
        }
    }
}

enum BufferedOp {
    Put(Table, Key, JsonValue),
    Delete(Table, String),
    DeletePrefix(Table, String),
}

pub struct MemoryTransaction {
    store: Arc<Mutex<Store>>,
    buffered: Vec<BufferedOp>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, table: Table, key: &str) -> anyhow::Result<Option<JsonValue>> {
        // Reflect the buffer's own not-yet-committed writes, so a
        // transaction can read back its own writes.
        for op in self.buffered.iter().rev() {
            match op {
                BufferedOp::Put(t, k, v) if *t == table && k == key => return Ok(Some(v.clone())),
                BufferedOp::Delete(t, k) if *t == table && k == key => return Ok(None),
                _ => {},
            }
        }
        Ok(self.store.lock().rows.get(&(table, key.to_string())).cloned())
    }

    async fn scan_prefix(&mut self, table: Table, prefix: &str) -> anyhow::Result<Vec<(Key, JsonValue)>> {
        let mut merged: BTreeMap<Key, Option<JsonValue>> = BTreeMap::new();
        {
            let guard = self.store.lock();
            for ((t, k), v) in guard.rows.range((table, prefix.to_string())..) {
                if *t != table || !k.starts_with(prefix) {
                    break;
                }
                merged.insert(k.clone(), Some(v.clone()));
            }
        }
        for op in &self.buffered {
            match op {
                BufferedOp::Put(t, k, v) if *t == table && k.starts_with(prefix) => {
                    merged.insert(k.clone(), Some(v.clone()));
                },
                BufferedOp::Delete(t, k) if *t == table && k.starts_with(prefix) => {
                    merged.insert(k.clone(), None);
                },
                BufferedOp::DeletePrefix(t, p) if *t == table && prefix.starts_with(p.as_str()) => {
                    merged.retain(|k, _| !k.starts_with(p.as_str()));
                },
                _ => {},
            }
        }
        Ok(merged.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect())
    }

    async fn put(&mut self, table: Table, key: Key, value: JsonValue) -> anyhow::Result<()> {
        self.buffered.push(BufferedOp::Put(table, key, value));
        Ok(())
    }

    async fn delete(&mut self, table: Table, key: &str) -> anyhow::Result<()> {
        self.buffered.push(BufferedOp::Delete(table, key.to_string()));
        Ok(())
    }

    async fn delete_prefix(&mut self, table: Table, prefix: &str) -> anyhow::Result<usize> {
        let count = self.scan_prefix(table, prefix).await?.len();
        self.buffered.push(BufferedOp::DeletePrefix(table, prefix.to_string()));
        Ok(count)
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    fn box_clone(&self) -> Box<dyn Persistence> {
        Box::new(self.clone())
    }

    async fn is_fresh(&self) -> anyhow::Result<bool> {
        Ok(self.store.lock().fresh)
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction { store: self.store.clone(), buffered: Vec::new() }))
    }

    async fn commit(&self, tx: Box<dyn Transaction>) -> anyhow::Result<()> {
        let tx = tx
            .into_any()
            .downcast::<MemoryTransaction>()
            .expect("MemoryPersistence::commit called with a transaction from a different backend");
        let mut guard = self.store.lock();
        if guard.read_only && tx.buffered.iter().any(|op| !matches!(op, BufferedOp::DeletePrefix(..))) {
            anyhow::bail!(ErrorMetadata::conflict("ReadOnly", "persistence is in read-only mode"));
        }
        for op in tx.buffered {
            match op {
                BufferedOp::Put(t, k, v) => {
                    guard.rows.insert((t, k), v);
                },
                BufferedOp::Delete(t, k) => {
                    guard.rows.remove(&(t, k));
                },
                BufferedOp::DeletePrefix(t, prefix) => {
                    guard.rows.retain(|(rt, rk), _| !(*rt == t && rk.starts_with(prefix.as_str())));
                },
            }
        }
        guard.fresh = false;
        Ok(())
    }

    async fn bulk_insert(
        &self,
        table: Table,
        rows: Vec<(Key, JsonValue)>,
        conflict: ConflictStrategy,
        max_batch_size: usize,
    ) -> anyhow::Result<BulkInsertOutcome> {
        let mut written = 0;
        for (index, chunk) in rows.chunks(max_batch_size.max(1)).enumerate() {
            let mut guard = self.store.lock();
            if guard.read_only {
                anyhow::bail!(ErrorMetadata::conflict("ReadOnly", "persistence is in read-only mode"));
            }
            for (offset, (key, value)) in chunk.iter().enumerate() {
                let row_key = (table, key.clone());
                if conflict == ConflictStrategy::Error && guard.rows.contains_key(&row_key) {
                    return Err(BatchError {
                        failed_row_index: index * max_batch_size.max(1) + offset,
                        source: ErrorMetadata::conflict("DuplicateKey", format!("row {key} already exists in {table}"))
                            .into(),
                    }
                    .into());
                }
                guard.rows.insert(row_key, value.clone());
                written += 1;
            }
            guard.fresh = false;
        }
        Ok(BulkInsertOutcome { rows_written: written })
    }

    async fn set_read_only(&self, read_only: bool) -> anyhow::Result<()> {
        self.store.lock().read_only = read_only;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.store.lock().read_only
    }
}

#[cfg(test)]
mod tests {
    use persistence::testing::run_persistence_test_suite;

    use super::*;

    #[tokio::test]
    async fn runs_shared_persistence_suite() {
        let p = MemoryPersistence::new();
        run_persistence_test_suite(&p).await;
    }

    #[tokio::test]
    async fn fresh_flag_flips_after_first_write() {
        let p = MemoryPersistence::new();
        assert!(p.is_fresh().await.unwrap());
        p.write_only("t", "k".to_string(), serde_json::json!(1)).await.unwrap();
        assert!(!p.is_fresh().await.unwrap());
    }
}
