//! PostgreSQL-backed `Persistence`. One of two concrete implementations of
//! the abstract KV-with-transactions interface; specific database dialects
//! stay out of scope for the rest of the workspace, so this crate stays
//! deliberately thin: one generic `kv_rows` table, real
//! `BEGIN`/`COMMIT`/rollback-on-drop semantics, and a `validate_commit_mode`
//! diagnostic.
//!
//! Uses `tokio-postgres` directly (no ORM), mapping `SqlState` codes onto
//! the shared `ErrorMetadata` taxonomy at the boundary, and pools
//! connections through `bb8`/`bb8-postgres` rather than opening a fresh
//! socket per call.

use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

use async_trait::async_trait;
use bb8::{
    Pool,
    PooledConnection,
    RunError,
};
use bb8_postgres::PostgresConnectionManager;
use errors::ErrorMetadata;
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
use tokio_postgres::{
    error::SqlState,
    Config,
    NoTls,
};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_rows (\
    table_name TEXT NOT NULL, \
    key TEXT NOT NULL, \
    value JSONB NOT NULL, \
    PRIMARY KEY (table_name, key)\
)";

type Manager = PostgresConnectionManager<NoTls>;

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: Pool<Manager>,
    read_only: std::sync::Arc<AtomicBool>,
}

impl PostgresPersistence {
    /// Builds a pool for `config` and runs schema migration against it.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let manager = Manager::new(config, NoTls);
        let pool = Pool::builder().build(manager).await.map_err(classify_connect_error)?;
        let conn = pool.get().await.map_err(classify_pool_error)?;
        conn.batch_execute(SCHEMA).await.map_err(classify_query_error)?;
        Ok(Self { pool, read_only: std::sync::Arc::new(AtomicBool::new(false)) })
    }

    /// Builds a handle directly from a pre-built pool, e.g. one shared with
    /// other components of the same process.
    pub fn from_pool(pool: Pool<Manager>) -> Self {
        Self { pool, read_only: std::sync::Arc::new(AtomicBool::new(false)) }
    }

    async fn connection(&self) -> anyhow::Result<PooledConnection<'_, Manager>> {
        self.pool.get().await.map_err(classify_pool_error)
    }

    /// Confirms a required storage setting (`synchronous_commit`) matches
    /// what the operator expects. A mismatch is surfaced as a diagnostic
    /// string rather than a hard failure: best-effort, log a warning.
    pub async fn validate_commit_mode(&self, expected: &str) -> anyhow::Result<Option<String>> {
        let conn = self.connection().await?;
        let row = conn.query_one("SHOW synchronous_commit", &[]).await.map_err(classify_query_error)?;
        let actual: String = row.get(0);
        if actual != expected {
            return Ok(Some(format!("synchronous_commit is {actual}, expected {expected}")));
        }
        Ok(None)
    }
}

fn classify_connect_error(e: RunError<tokio_postgres::Error>) -> anyhow::Error {
    match e {
        RunError::User(e) => ErrorMetadata::transient("PgConnectFailed", e.to_string()).into(),
        RunError::TimedOut => ErrorMetadata::transient("PgConnectFailed", "connection pool timed out").into(),
    }
}

fn classify_pool_error(e: RunError<tokio_postgres::Error>) -> anyhow::Error {
    match e {
        RunError::User(e) => classify_query_error(e),
        RunError::TimedOut => ErrorMetadata::transient("PgPoolTimedOut", "connection pool timed out").into(),
    }
}

fn classify_query_error(e: tokio_postgres::Error) -> anyhow::Error {
    if let Some(code) = e.code() {
        if *code == SqlState::UNIQUE_VIOLATION {
            return ErrorMetadata::conflict("UniqueViolation", e.to_string()).into();
        }
        if matches!(
            *code,
            SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::ADMIN_SHUTDOWN
                | SqlState::CRASH_SHUTDOWN
                | SqlState::TOO_MANY_CONNECTIONS
        ) {
            return ErrorMetadata::transient("PgTransientError", e.to_string()).into();
        }
    } else {
        // A closed-socket style error with no SQLSTATE is almost always
        // transient (dropped connection, timeout).
        return ErrorMetadata::transient("PgIoError", e.to_string()).into();
    }
    anyhow::Error::new(e)
}

pub struct PgTransaction {
    conn: Option<PooledConnection<'static, Manager>>,
    committed: bool,
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(conn) = self.conn.take() {
                tokio::spawn(async move {
                    if let Err(e) = conn.batch_execute("ROLLBACK").await {
                        tracing::debug!("rollback of dropped postgres transaction failed: {e:#}");
                    }
                });
            }
        }
    }
}

impl PgTransaction {
    fn conn(&self) -> &PooledConnection<'static, Manager> {
        self.conn.as_ref().expect("transaction already finished")
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get(&mut self, table: Table, key: &str) -> anyhow::Result<Option<JsonValue>> {
        let row = self
            .conn()
            .query_opt("SELECT value FROM kv_rows WHERE table_name = $1 AND key = $2", &[&table, &key])
            .await
            .map_err(classify_query_error)?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn scan_prefix(&mut self, table: Table, prefix: &str) -> anyhow::Result<Vec<(Key, JsonValue)>> {
        let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = self
            .conn()
            .query(
                "SELECT key, value FROM kv_rows WHERE table_name = $1 AND key LIKE $2 ESCAPE '\\' ORDER BY key ASC",
                &[&table, &like_pattern],
            )
            .await
            .map_err(classify_query_error)?;
        Ok(rows.into_iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    async fn put(&mut self, table: Table, key: Key, value: JsonValue) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "INSERT INTO kv_rows (table_name, key, value) VALUES ($1, $2, $3) \
                 ON CONFLICT (table_name, key) DO UPDATE SET value = EXCLUDED.value",
                &[&table, &key, &value],
            )
            .await
            .map_err(classify_query_error)?;
        Ok(())
    }

    async fn delete(&mut self, table: Table, key: &str) -> anyhow::Result<()> {
        self.conn()
            .execute("DELETE FROM kv_rows WHERE table_name = $1 AND key = $2", &[&table, &key])
            .await
            .map_err(classify_query_error)?;
        Ok(())
    }

    async fn delete_prefix(&mut self, table: Table, prefix: &str) -> anyhow::Result<usize> {
        let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM kv_rows WHERE table_name = $1 AND key LIKE $2 ESCAPE '\\'",
                &[&table, &like_pattern],
            )
            .await
            .map_err(classify_query_error)?;
        Ok(deleted as usize)
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    fn box_clone(&self) -> Box<dyn Persistence> {
        Box::new(self.clone())
    }

    async fn is_fresh(&self) -> anyhow::Result<bool> {
        let conn = self.connection().await?;
        let row = conn.query_one("SELECT count(*) FROM kv_rows", &[]).await.map_err(classify_query_error)?;
        let count: i64 = row.get(0);
        Ok(count == 0)
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn Transaction>> {
        let conn = self.pool.get_owned().await.map_err(classify_pool_error)?;
        conn.batch_execute("BEGIN").await.map_err(classify_query_error)?;
        Ok(Box::new(PgTransaction { conn: Some(conn), committed: false }))
    }

    async fn commit(&self, tx: Box<dyn Transaction>) -> anyhow::Result<()> {
        if self.is_read_only() {
            anyhow::bail!(ErrorMetadata::conflict("ReadOnly", "persistence is in read-only mode"));
        }
        let mut tx = tx
            .into_any()
            .downcast::<PgTransaction>()
            .expect("PostgresPersistence::commit called with a transaction from a different backend");
        tx.conn().batch_execute("COMMIT").await.map_err(classify_query_error)?;
        tx.committed = true;
        tx.conn.take();
        Ok(())
    }

    async fn bulk_insert(
        &self,
        table: Table,
        rows: Vec<(Key, JsonValue)>,
        conflict: ConflictStrategy,
        max_batch_size: usize,
    ) -> anyhow::Result<BulkInsertOutcome> {
        if self.is_read_only() {
            anyhow::bail!(ErrorMetadata::conflict("ReadOnly", "persistence is in read-only mode"));
        }
        let conn = self.connection().await?;
        let conflict_clause = match conflict {
            ConflictStrategy::Error => "",
            ConflictStrategy::Overwrite => "ON CONFLICT (table_name, key) DO UPDATE SET value = EXCLUDED.value",
        };
        let stmt = conn
            .prepare(&format!(
                "INSERT INTO kv_rows (table_name, key, value) VALUES ($1, $2, $3) {conflict_clause}"
            ))
            .await
            .map_err(classify_query_error)?;

        let mut written = 0;
        for (index, chunk) in rows.chunks(max_batch_size.max(1)).enumerate() {
            conn.batch_execute("BEGIN").await.map_err(classify_query_error)?;
            for (offset, (key, value)) in chunk.iter().enumerate() {
                if let Err(e) = conn.execute(&stmt, &[&table, key, value]).await {
                    let _ = conn.batch_execute("ROLLBACK").await;
                    return Err(BatchError {
                        failed_row_index: index * max_batch_size.max(1) + offset,
                        source: classify_query_error(e),
                    }
                    .into());
                }
                written += 1;
            }
            conn.batch_execute("COMMIT").await.map_err(classify_query_error)?;
        }
        Ok(BulkInsertOutcome { rows_written: written })
    }

    async fn set_read_only(&self, read_only: bool) -> anyhow::Result<()> {
        self.read_only.store(read_only, Ordering::SeqCst);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }
}
