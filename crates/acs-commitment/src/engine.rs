//! ACS Commitment Engine: persisted computed/received
//! commitment history plus the in-memory outstanding-period tracker,
//! commitment queue, and incremental snapshot store that sit above it.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{
        Hash,
        Hasher,
    },
    sync::Arc,
};

use domain::{
    commitment::{
        AcsCommitmentMessage,
        CommitmentPeriod,
        SignedAcsCommitment,
    },
    member::MemberName,
};
use parking_lot::Mutex;
use persistence::Persistence;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    config::Config,
    errors::CommitmentConflict,
    keys,
    metrics::AcsCommitmentMetrics,
    outstanding::OutstandingTracker,
    queue::CommitmentQueue,
    snapshot::IncrementalAcsSnapshotStore,
};

const COMPUTED_TABLE: &str = "acs_commitments_computed";
const RECEIVED_TABLE: &str = "acs_commitments_received";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredComputed {
    peer: MemberName,
    period: CommitmentPeriod,
    commitment_bytes: Vec<u8>,
}

/// Outcome of folding a freshly received commitment against local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// Matches a locally computed commitment for the same period/peer; the
    /// period has been marked safe.
    Matched,
    /// A locally computed commitment exists for this period/peer but the
    /// bytes differ; a non-fatal discrepancy for higher layers to surface.
    Mismatch { computed_bytes: Vec<u8>, received_bytes: Vec<u8> },
    /// No locally computed commitment yet; queued for later reconciliation.
    PendingComputation,
}

pub struct AcsCommitmentEngine {
    persistence: Box<dyn Persistence>,
    config: Config,
    metrics: Arc<AcsCommitmentMetrics>,
    outstanding: Mutex<OutstandingTracker>,
    queue: Mutex<CommitmentQueue>,
    snapshot_store: Mutex<IncrementalAcsSnapshotStore>,
}

impl AcsCommitmentEngine {
    pub fn new(persistence: Box<dyn Persistence>, config: Config) -> Self {
        Self {
            persistence,
            config,
            metrics: Arc::new(AcsCommitmentMetrics::default()),
            outstanding: Mutex::new(OutstandingTracker::new()),
            queue: Mutex::new(CommitmentQueue::new()),
            snapshot_store: Mutex::new(IncrementalAcsSnapshotStore::new()),
        }
    }

    pub fn metrics(&self) -> &AcsCommitmentMetrics {
        &self.metrics
    }

    pub fn snapshot_store(&self) -> &Mutex<IncrementalAcsSnapshotStore> {
        &self.snapshot_store
    }

    pub fn queue(&self) -> &Mutex<CommitmentQueue> {
        &self.queue
    }

    // ---- Outstanding-period tracking ----

    pub fn mark_outstanding(&self, period: CommitmentPeriod, peers: &[MemberName]) {
        self.outstanding.lock().mark_outstanding(period, peers);
    }

    pub fn mark_safe(&self, peer: &MemberName, period: CommitmentPeriod) {
        self.outstanding.lock().mark_safe(peer, period);
        self.metrics.record_marked_safe();
    }

    pub fn outstanding(&self, ts_low: domain::Timestamp, ts_high: domain::Timestamp, peer: Option<&MemberName>) -> Vec<(MemberName, CommitmentPeriod)> {
        self.outstanding.lock().outstanding(ts_low, ts_high, peer)
    }

    pub fn mark_computed_and_sent(&self, period: CommitmentPeriod) {
        self.outstanding.lock().mark_computed_and_sent(period);
    }

    pub fn no_outstanding_commitments(&self, end_of_time: domain::Timestamp) -> anyhow::Result<domain::Timestamp> {
        self.outstanding.lock().no_outstanding_commitments(end_of_time)
    }

    // ---- Persisted computed/received history ----

    /// Idempotent for an identical `(period, peer, commitment)` triple;
    /// rejects a different commitment for the same `(period, peer)`.
    pub async fn store_computed(&self, period: CommitmentPeriod, peer: MemberName, commitment_bytes: Vec<u8>) -> anyhow::Result<()> {
        let key = keys::computed_key(&peer, &period);
        let mut tx = self.persistence.begin().await?;
        if let Some(existing) = tx.get(COMPUTED_TABLE, &key).await? {
            let stored: StoredComputed = serde_json::from_value(existing)?;
            self.persistence.commit(tx).await?;
            if stored.commitment_bytes == commitment_bytes {
                return Ok(());
            }
            anyhow::bail!(CommitmentConflict { peer, period });
        }
        let stored = StoredComputed { peer: peer.clone(), period, commitment_bytes };
        tx.put(COMPUTED_TABLE, key, serde_json::to_value(&stored)?).await?;
        self.persistence.commit(tx).await?;
        self.metrics.record_computed_stored();
        Ok(())
    }

    /// Idempotent for an identical signed payload; differing candidates from
    /// the same peer/period are kept side by side.
    pub async fn store_received(&self, signed: SignedAcsCommitment) -> anyhow::Result<ReconciliationOutcome> {
        let peer = signed.message.sender.clone();
        let period = signed.message.period;
        let key = keys::received_key(&peer, &period, content_hash(&signed));

        let mut tx = self.persistence.begin().await?;
        tx.put(RECEIVED_TABLE, key, serde_json::to_value(&signed)?).await?;
        self.persistence.commit(tx).await?;
        self.metrics.record_received_stored();

        self.reconcile(&peer, period, &signed.message).await
    }

    async fn reconcile(&self, peer: &MemberName, period: CommitmentPeriod, received: &AcsCommitmentMessage) -> anyhow::Result<ReconciliationOutcome> {
        let computed_key = keys::computed_key(peer, &period);
        let mut tx = self.persistence.begin().await?;
        let computed = tx.get(COMPUTED_TABLE, &computed_key).await?;
        self.persistence.commit(tx).await?;

        let Some(value) = computed else {
            return Ok(ReconciliationOutcome::PendingComputation);
        };
        let stored: StoredComputed = serde_json::from_value(value)?;
        if stored.commitment_bytes == received.commitment_bytes {
            self.mark_safe(peer, period);
            Ok(ReconciliationOutcome::Matched)
        } else {
            self.metrics.record_mismatch();
            Ok(ReconciliationOutcome::Mismatch { computed_bytes: stored.commitment_bytes, received_bytes: received.commitment_bytes.clone() })
        }
    }

    /// All computed commitments for `peer` whose period overlaps
    /// `[from, to]`.
    pub async fn get_computed(&self, peer: &MemberName, from: domain::Timestamp, to: domain::Timestamp) -> anyhow::Result<Vec<(CommitmentPeriod, Vec<u8>)>> {
        let window = CommitmentPeriod { from_exclusive: from, to_inclusive: to };
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(COMPUTED_TABLE, &keys::peer_prefix(peer)).await?;
        self.persistence.commit(tx).await?;
        rows.into_iter()
            .map(|(_, v)| serde_json::from_value::<StoredComputed>(v).map_err(anyhow::Error::from))
            .filter(|r| r.as_ref().is_ok_and(|s| s.period.overlaps(&window)))
            .map(|r| r.map(|s| (s.period, s.commitment_bytes)))
            .collect()
    }

    /// All computed commitments across every peer whose period overlaps
    /// `[from, to]`.
    pub async fn search_computed_between(&self, from: domain::Timestamp, to: domain::Timestamp) -> anyhow::Result<Vec<(MemberName, CommitmentPeriod, Vec<u8>)>> {
        let window = CommitmentPeriod { from_exclusive: from, to_inclusive: to };
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(COMPUTED_TABLE, keys::ALL).await?;
        self.persistence.commit(tx).await?;
        rows.into_iter()
            .map(|(_, v)| serde_json::from_value::<StoredComputed>(v).map_err(anyhow::Error::from))
            .filter(|r| r.as_ref().is_ok_and(|s| s.period.overlaps(&window)))
            .map(|r| r.map(|s| (s.peer, s.period, s.commitment_bytes)))
            .collect()
    }

    /// All received commitments across every peer whose period overlaps
    /// `[from, to]`.
    pub async fn search_received_between(&self, from: domain::Timestamp, to: domain::Timestamp) -> anyhow::Result<Vec<SignedAcsCommitment>> {
        let window = CommitmentPeriod { from_exclusive: from, to_inclusive: to };
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(RECEIVED_TABLE, keys::ALL).await?;
        self.persistence.commit(tx).await?;
        rows.into_iter()
            .map(|(_, v)| serde_json::from_value::<SignedAcsCommitment>(v).map_err(anyhow::Error::from))
            .filter(|r| r.as_ref().is_ok_and(|s| s.message.period.overlaps(&window)))
            .collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn content_hash(signed: &SignedAcsCommitment) -> u64 {
    let mut hasher = DefaultHasher::new();
    signed.message.commitment_bytes.hash(&mut hasher);
    signed.signature.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use domain::{
        acs::DomainId,
        Timestamp,
    };
    use persistence_memory::MemoryPersistence;

    use super::*;

    fn engine() -> AcsCommitmentEngine {
        AcsCommitmentEngine::new(Box::new(MemoryPersistence::new()), Config::default())
    }

    fn period(from: i64, to: i64) -> CommitmentPeriod {
        CommitmentPeriod { from_exclusive: Timestamp::from_micros(from), to_inclusive: Timestamp::from_micros(to) }
    }

    fn signed(period: CommitmentPeriod, sender: &str, counter_participant: &str, bytes: &[u8]) -> SignedAcsCommitment {
        SignedAcsCommitment {
            message: AcsCommitmentMessage {
                domain_id: DomainId("d1".to_string()),
                sender: MemberName(sender.to_string()),
                counter_participant: MemberName(counter_participant.to_string()),
                period,
                commitment_bytes: bytes.to_vec(),
            },
            signature: vec![1],
        }
    }

    #[tokio::test]
    async fn store_computed_is_idempotent_for_identical_triple() {
        let engine = engine();
        let peer = MemberName("B".to_string());
        engine.store_computed(period(0, 5), peer.clone(), vec![1, 2, 3]).await.unwrap();
        engine.store_computed(period(0, 5), peer, vec![1, 2, 3]).await.unwrap();
    }

    #[tokio::test]
    async fn store_computed_rejects_differing_commitment_for_same_period_peer() {
        let engine = engine();
        let peer = MemberName("B".to_string());
        engine.store_computed(period(0, 5), peer.clone(), vec![1, 2, 3]).await.unwrap();
        let err = engine.store_computed(period(0, 5), peer, vec![9, 9, 9]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn store_received_matching_computed_marks_safe() {
        let engine = engine();
        let period = period(0, 5);
        engine.store_computed(period, MemberName("B".to_string()), vec![1, 2, 3]).await.unwrap();
        engine.mark_outstanding(period, &[MemberName("B".to_string())]);

        let outcome = engine.store_received(signed(period, "B", "A", &[1, 2, 3])).await.unwrap();
        assert_eq!(outcome, ReconciliationOutcome::Matched);

        let remaining = engine.outstanding(Timestamp::from_micros(0), Timestamp::from_micros(5), Some(&MemberName("B".to_string())));
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn store_received_mismatched_commitment_surfaces_discrepancy() {
        let engine = engine();
        let period = period(0, 5);
        engine.store_computed(period, MemberName("B".to_string()), vec![1, 2, 3]).await.unwrap();

        let outcome = engine.store_received(signed(period, "B", "A", &[9, 9, 9])).await.unwrap();
        assert!(matches!(outcome, ReconciliationOutcome::Mismatch { .. }));
    }

    #[tokio::test]
    async fn store_received_without_computed_yet_is_pending() {
        let engine = engine();
        let outcome = engine.store_received(signed(period(0, 5), "B", "A", &[1])).await.unwrap();
        assert_eq!(outcome, ReconciliationOutcome::PendingComputation);
    }

    #[tokio::test]
    async fn search_computed_between_finds_overlapping_periods_across_peers() {
        let engine = engine();
        engine.store_computed(period(0, 5), MemberName("A".to_string()), vec![1]).await.unwrap();
        engine.store_computed(period(10, 15), MemberName("B".to_string()), vec![2]).await.unwrap();
        let found = engine.search_computed_between(Timestamp::from_micros(0), Timestamp::from_micros(5)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, MemberName("A".to_string()));
    }
}
