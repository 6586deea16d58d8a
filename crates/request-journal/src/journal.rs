//! Request Journal: a per-request state machine with
//! monotonic cursors (`Pending prehead`, `Clean prehead`) that determine the
//! exact recovery point after a crash.
//!
//! Requests move through a commit pipeline with OCC-style conflict checks,
//! with cursor-future completion analogous to a timestamp-subscription
//! wait: a three-state (`Pending`/`Confirmed`/`Clean`) per-request machine
//! with two independent prehead cursors.

use std::collections::BTreeMap;

use domain::{
    errors::{
        ConcurrentModification,
        InconsistentTimestamps,
    },
    request::{
        RepairContext,
        RequestCounter,
        RequestData,
        RequestState,
    },
    Timestamp,
};
use persistence::Persistence;

use crate::{
    config::Config,
    cursors::{
        CleanPreheadCursor,
        PendingPreheadCursor,
    },
    errors::IllegalArgument,
    keys,
};

const JOURNAL_TABLE: &str = "request_journal";

#[derive(Clone)]
pub struct RequestJournal {
    persistence: Box<dyn Persistence>,
    config: Config,
    pending_prehead: PendingPreheadCursor,
    clean_prehead: CleanPreheadCursor,
}

impl RequestJournal {
    /// Constructs a journal and primes its cursors from whatever is already
    /// durable (used on startup; a fresh journal primes to `None`/genesis).
    pub async fn load(persistence: Box<dyn Persistence>, config: Config) -> anyhow::Result<Self> {
        let journal = Self {
            persistence,
            config,
            pending_prehead: PendingPreheadCursor::new(),
            clean_prehead: CleanPreheadCursor::new(),
        };
        let rows = journal.all_rows().await?;
        journal.pending_prehead.advance(compute_pending_prehead(&rows, journal.config.genesis_rc));
        journal.clean_prehead.advance(compute_clean_prehead(&rows, journal.config.genesis_rc));
        Ok(journal)
    }

    pub fn pending_prehead_cursor(&self) -> &PendingPreheadCursor {
        &self.pending_prehead
    }

    pub fn clean_prehead_cursor(&self) -> &CleanPreheadCursor {
        &self.clean_prehead
    }

    async fn all_rows(&self) -> anyhow::Result<BTreeMap<u64, RequestData>> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(JOURNAL_TABLE, "").await?;
        self.persistence.commit(tx).await?;
        let mut by_rc = BTreeMap::new();
        for (_, v) in rows {
            let rd: RequestData = serde_json::from_value(v)?;
            by_rc.insert(rd.rc.0, rd);
        }
        Ok(by_rc)
    }

    pub async fn fetch(&self, rc: RequestCounter) -> anyhow::Result<Option<RequestData>> {
        let mut tx = self.persistence.begin().await?;
        let row = tx.get(JOURNAL_TABLE, &keys::rc_key(rc)).await?;
        self.persistence.commit(tx).await?;
        row.map(|v| serde_json::from_value(v)).transpose().map_err(Into::into)
    }

    /// Inserts a new `Pending` row. Fails with `IllegalArgument` if `rc` is
    /// already present or below the
    /// journal's genesis.
    pub async fn insert(
        &self,
        rc: RequestCounter,
        request_ts: Timestamp,
        repair_context: Option<RepairContext>,
    ) -> anyhow::Result<()> {
        if rc < self.config.genesis_rc {
            anyhow::bail!(IllegalArgument::BelowGenesis { rc, genesis: self.config.genesis_rc });
        }
        let key = keys::rc_key(rc);
        let mut tx = self.persistence.begin().await?;
        if tx.get(JOURNAL_TABLE, &key).await?.is_some() {
            self.persistence.commit(tx).await?;
            anyhow::bail!(IllegalArgument::AlreadyInserted { rc });
        }
        let row = RequestData { rc, state: RequestState::Pending, request_ts, commit_ts: None, repair_context };
        tx.put(JOURNAL_TABLE, key, serde_json::to_value(&row)?).await?;
        self.persistence.commit(tx).await?;
        self.recompute_preheads().await?;
        tracing::debug!(request.rc = rc.0, "inserted pending request");
        Ok(())
    }

    /// `Pending -> Confirmed`. `Confirmed` carries no prehead.
    pub async fn transit(&self, rc: RequestCounter, request_ts: Timestamp) -> anyhow::Result<()> {
        self.advance(rc, request_ts, RequestState::Pending, |row| {
            row.state = RequestState::Confirmed;
        })
        .await?;
        Ok(())
    }

    /// `Confirmed -> Clean`. Requires `commit_ts >= request_ts`.
    pub async fn terminate(&self, rc: RequestCounter, request_ts: Timestamp, commit_ts: Timestamp) -> anyhow::Result<()> {
        anyhow::ensure!(
            commit_ts >= request_ts,
            "commit timestamp {commit_ts} must not precede request timestamp {request_ts} for rc {rc:?}"
        );
        self.advance(rc, request_ts, RequestState::Confirmed, |row| {
            row.state = RequestState::Clean;
            row.commit_ts = Some(commit_ts);
        })
        .await?;
        self.recompute_preheads().await?;
        Ok(())
    }

    async fn advance(
        &self,
        rc: RequestCounter,
        request_ts: Timestamp,
        expected_predecessor: RequestState,
        mutate: impl FnOnce(&mut RequestData),
    ) -> anyhow::Result<()> {
        let key = keys::rc_key(rc);
        let mut tx = self.persistence.begin().await?;
        let Some(v) = tx.get(JOURNAL_TABLE, &key).await? else {
            self.persistence.commit(tx).await?;
            anyhow::bail!(ConcurrentModification { rc });
        };
        let mut row: RequestData = serde_json::from_value(v)?;
        if row.state != expected_predecessor {
            self.persistence.commit(tx).await?;
            anyhow::bail!(ConcurrentModification { rc });
        }
        if row.request_ts != request_ts {
            self.persistence.commit(tx).await?;
            anyhow::bail!(InconsistentTimestamps { rc, stored: row.request_ts, called_with: request_ts });
        }
        mutate(&mut row);
        tx.put(JOURNAL_TABLE, key, serde_json::to_value(&row)?).await?;
        self.persistence.commit(tx).await
    }

    async fn recompute_preheads(&self) -> anyhow::Result<()> {
        let rows = self.all_rows().await?;
        self.pending_prehead.advance(compute_pending_prehead(&rows, self.config.genesis_rc));
        self.clean_prehead.advance(compute_clean_prehead(&rows, self.config.genesis_rc));
        Ok(())
    }

    pub fn pending_prehead(&self) -> Option<RequestCounter> {
        self.pending_prehead.current()
    }

    pub fn clean_prehead(&self) -> Option<(RequestCounter, Timestamp)> {
        self.clean_prehead.current()
    }

    pub async fn wait_for_pending_prehead(&self, target: RequestCounter) {
        self.pending_prehead.wait_for(target).await
    }

    pub async fn wait_for_clean_prehead(&self, target: RequestCounter) {
        self.clean_prehead.wait_for(target).await
    }

    pub async fn highest_inserted_rc(&self) -> anyhow::Result<Option<RequestCounter>> {
        let rows = self.all_rows().await?;
        Ok(rows.keys().next_back().map(|rc| RequestCounter(*rc)))
    }

    /// `highestInsertedRc - cleanPrehead`.
    pub async fn dirty_request_count(&self) -> anyhow::Result<u64> {
        let Some(highest) = self.highest_inserted_rc().await? else {
            return Ok(0);
        };
        let clean = self.clean_prehead().map(|(rc, _)| rc.0).unwrap_or(self.config.genesis_rc.0.saturating_sub(1));
        Ok(highest.0.saturating_sub(clean))
    }
}

fn compute_pending_prehead(rows: &BTreeMap<u64, RequestData>, genesis: RequestCounter) -> Option<RequestCounter> {
    let mut prehead = None;
    let mut expect = genesis.0;
    while rows.contains_key(&expect) {
        prehead = Some(RequestCounter(expect));
        expect += 1;
    }
    prehead
}

fn compute_clean_prehead(rows: &BTreeMap<u64, RequestData>, genesis: RequestCounter) -> Option<(RequestCounter, Timestamp)> {
    let mut prehead = None;
    let mut expect = genesis.0;
    while let Some(row) = rows.get(&expect) {
        if row.state != RequestState::Clean {
            break;
        }
        let commit_ts = row.commit_ts.expect("a Clean row always carries a commit_ts");
        prehead = Some((row.rc, commit_ts));
        expect += 1;
    }
    prehead
}

#[cfg(test)]
mod tests {
    use persistence_memory::MemoryPersistence;

    use super::*;

    async fn journal() -> RequestJournal {
        RequestJournal::load(Box::new(MemoryPersistence::new()), Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn full_lifecycle_advances_preheads() {
        let journal = journal().await;
        let rc = RequestCounter(0);
        let ts = Timestamp::from_micros(10);
        journal.insert(rc, ts, None).await.unwrap();
        assert_eq!(journal.pending_prehead(), Some(rc));
        assert_eq!(journal.clean_prehead(), None);

        journal.transit(rc, ts).await.unwrap();
        assert_eq!(journal.fetch(rc).await.unwrap().unwrap().state, RequestState::Confirmed);
        assert_eq!(journal.clean_prehead(), None);

        journal.terminate(rc, ts, Timestamp::from_micros(15)).await.unwrap();
        assert_eq!(journal.clean_prehead(), Some((rc, Timestamp::from_micros(15))));
    }

    #[tokio::test]
    async fn duplicate_insert_is_illegal_argument() {
        let journal = journal().await;
        let rc = RequestCounter(0);
        journal.insert(rc, Timestamp::from_micros(1), None).await.unwrap();
        let err = journal.insert(rc, Timestamp::from_micros(1), None).await.unwrap_err();
        assert!(err.downcast::<IllegalArgument>().is_ok());
    }

    #[tokio::test]
    async fn insert_below_genesis_is_illegal_argument() {
        let journal =
            RequestJournal::load(Box::new(MemoryPersistence::new()), Config { genesis_rc: RequestCounter(10) })
                .await
                .unwrap();
        let err = journal.insert(RequestCounter(5), Timestamp::from_micros(1), None).await.unwrap_err();
        assert!(err.downcast::<IllegalArgument>().is_ok());
    }

    #[tokio::test]
    async fn transit_from_wrong_state_is_concurrent_modification() {
        let journal = journal().await;
        let rc = RequestCounter(0);
        let ts = Timestamp::from_micros(1);
        journal.insert(rc, ts, None).await.unwrap();
        journal.transit(rc, ts).await.unwrap();
        // already Confirmed, calling transit again expects Pending predecessor.
        let err = journal.transit(rc, ts).await.unwrap_err();
        assert!(err.downcast::<ConcurrentModification>().is_ok());
    }

    #[tokio::test]
    async fn mismatched_request_timestamp_is_rejected() {
        let journal = journal().await;
        let rc = RequestCounter(0);
        journal.insert(rc, Timestamp::from_micros(1), None).await.unwrap();
        let err = journal.transit(rc, Timestamp::from_micros(2)).await.unwrap_err();
        assert!(err.downcast::<InconsistentTimestamps>().is_ok());
    }

    #[tokio::test]
    async fn terminate_requires_commit_ts_after_request_ts() {
        let journal = journal().await;
        let rc = RequestCounter(0);
        let ts = Timestamp::from_micros(10);
        journal.insert(rc, ts, None).await.unwrap();
        journal.transit(rc, ts).await.unwrap();
        assert!(journal.terminate(rc, ts, Timestamp::from_micros(5)).await.is_err());
    }

    /// Clean prehead equals the highest consecutive clean
    /// `rc`, never regresses.
    #[tokio::test]
    async fn clean_prehead_is_highest_contiguous_clean_rc() {
        let journal = journal().await;
        for i in 0..5u64 {
            let rc = RequestCounter(i);
            let ts = Timestamp::from_micros(i as i64 * 10);
            journal.insert(rc, ts, None).await.unwrap();
            journal.transit(rc, ts).await.unwrap();
        }
        // Terminate out of order: 1 and 3 clean before 0, 2.
        journal.terminate(RequestCounter(1), Timestamp::from_micros(10), Timestamp::from_micros(11)).await.unwrap();
        assert_eq!(journal.clean_prehead(), None);
        journal.terminate(RequestCounter(0), Timestamp::from_micros(0), Timestamp::from_micros(1)).await.unwrap();
        assert_eq!(journal.clean_prehead().unwrap().0, RequestCounter(1));
        journal.terminate(RequestCounter(2), Timestamp::from_micros(20), Timestamp::from_micros(21)).await.unwrap();
        assert_eq!(journal.clean_prehead().unwrap().0, RequestCounter(2));
    }

    #[tokio::test]
    async fn dirty_request_count_tracks_highest_minus_clean() {
        let journal = journal().await;
        for i in 0..3u64 {
            let rc = RequestCounter(i);
            let ts = Timestamp::from_micros(i as i64);
            journal.insert(rc, ts, None).await.unwrap();
        }
        assert_eq!(journal.dirty_request_count().await.unwrap(), 3);
        journal.transit(RequestCounter(0), Timestamp::from_micros(0)).await.unwrap();
        journal.terminate(RequestCounter(0), Timestamp::from_micros(0), Timestamp::from_micros(0)).await.unwrap();
        assert_eq!(journal.dirty_request_count().await.unwrap(), 2);
    }
}
