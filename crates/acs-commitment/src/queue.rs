//! In-memory commitment queue: a priority store of received
//! commitments ordered by `period.toInclusive` ascending, draining as the
//! reconciliation horizon advances past them.

use std::collections::BTreeMap;

use domain::{
    commitment::SignedAcsCommitment,
    Timestamp,
};

#[derive(Debug, Clone, Default)]
pub struct CommitmentQueue {
    by_to_inclusive: BTreeMap<Timestamp, Vec<SignedAcsCommitment>>,
}

impl CommitmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent for an equal message already queued at the same key.
    pub fn enqueue(&mut self, commitment: SignedAcsCommitment) {
        let bucket = self.by_to_inclusive.entry(commitment.message.period.to_inclusive).or_default();
        if !bucket.contains(&commitment) {
            bucket.push(commitment);
        }
    }

    /// All queued commitments with `period.toInclusive <= ts`, in ascending
    /// key order, without removing them.
    pub fn peek_through(&self, ts: Timestamp) -> Vec<SignedAcsCommitment> {
        self.by_to_inclusive.range(..=ts).flat_map(|(_, v)| v.iter().cloned()).collect()
    }

    /// Removes every commitment with `period.toInclusive <= ts`; returns the
    /// count removed.
    pub fn delete_through(&mut self, ts: Timestamp) -> usize {
        let keys: Vec<Timestamp> = self.by_to_inclusive.range(..=ts).map(|(k, _)| *k).collect();
        keys.into_iter().filter_map(|k| self.by_to_inclusive.remove(&k)).map(|v| v.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.by_to_inclusive.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
