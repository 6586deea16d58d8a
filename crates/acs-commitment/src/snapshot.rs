//! Incremental ACS snapshot store: a monotonic record-time
//! watermark plus per-stakeholder-pair accumulated commitment hash, updated
//! atomically as new ACS changes are folded in between ticks.

use std::collections::HashMap;

use domain::{
    member::MemberName,
    Timestamp,
};

pub type StakeholderPair = (MemberName, MemberName);

/// `(ts, tieBreaker)`, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordTime {
    pub ts: Timestamp,
    pub tie_breaker: u64,
}

#[derive(Debug, Default)]
pub struct IncrementalAcsSnapshotStore {
    watermark: Option<RecordTime>,
    hashes: HashMap<StakeholderPair, Vec<u8>>,
}

impl IncrementalAcsSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watermark(&self) -> Option<RecordTime> {
        self.watermark
    }

    pub fn hash_of(&self, pair: &StakeholderPair) -> Option<&[u8]> {
        self.hashes.get(pair).map(Vec::as_slice)
    }

    /// Atomic, monotonic advance: rejects a `record_time` at or behind the
    /// current watermark.
    pub fn update(
        &mut self,
        record_time: RecordTime,
        upserts: Vec<(StakeholderPair, Vec<u8>)>,
        deletes: Vec<StakeholderPair>,
    ) -> anyhow::Result<()> {
        if let Some(current) = self.watermark {
            anyhow::ensure!(
                record_time > current,
                "snapshot watermark must advance monotonically: {:?} is not after {:?}",
                record_time,
                current
            );
        }
        for (pair, hash) in upserts {
            self.hashes.insert(pair, hash);
        }
        for pair in deletes {
            self.hashes.remove(&pair);
        }
        self.watermark = Some(record_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str) -> StakeholderPair {
        (MemberName(a.to_string()), MemberName(b.to_string()))
    }

    #[test]
    fn update_advances_watermark_and_applies_upserts() {
        let mut store = IncrementalAcsSnapshotStore::new();
        let rt = RecordTime { ts: Timestamp::from_micros(10), tie_breaker: 0 };
        store.update(rt, vec![(pair("A", "B"), vec![1, 2, 3])], vec![]).unwrap();
        assert_eq!(store.watermark(), Some(rt));
        assert_eq!(store.hash_of(&pair("A", "B")), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn update_rejects_non_monotonic_record_time() {
        let mut store = IncrementalAcsSnapshotStore::new();
        let first = RecordTime { ts: Timestamp::from_micros(10), tie_breaker: 0 };
        let earlier = RecordTime { ts: Timestamp::from_micros(5), tie_breaker: 0 };
        store.update(first, vec![], vec![]).unwrap();
        assert!(store.update(earlier, vec![], vec![]).is_err());
    }

    #[test]
    fn update_applies_deletes() {
        let mut store = IncrementalAcsSnapshotStore::new();
        let first = RecordTime { ts: Timestamp::from_micros(10), tie_breaker: 0 };
        let second = RecordTime { ts: Timestamp::from_micros(20), tie_breaker: 0 };
        store.update(first, vec![(pair("A", "B"), vec![9])], vec![]).unwrap();
        store.update(second, vec![], vec![pair("A", "B")]).unwrap();
        assert_eq!(store.hash_of(&pair("A", "B")), None);
    }
}
