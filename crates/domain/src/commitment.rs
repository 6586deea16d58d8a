//! ACS commitment data model.

use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    acs::DomainId,
    member::MemberName,
    Timestamp,
};

/// `[fromExclusive, toInclusive]`, both aligned to multiples of the
/// configured reconciliation interval. `fromExclusive == Timestamp::MIN` is
/// the distinguished "start of time" period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitmentPeriod {
    pub from_exclusive: Timestamp,
    pub to_inclusive: Timestamp,
}

impl CommitmentPeriod {
    pub fn new(from_exclusive: Timestamp, to_inclusive: Timestamp) -> anyhow::Result<Self> {
        anyhow::ensure!(
            from_exclusive < to_inclusive,
            "commitment period must have fromExclusive < toInclusive, got {from_exclusive} and {to_inclusive}"
        );
        Ok(Self { from_exclusive, to_inclusive })
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts > self.from_exclusive && ts <= self.to_inclusive
    }

    /// Periods are ordered for the in-memory commitment queue by `toInclusive` ascending.
    pub fn queue_key(&self) -> Timestamp {
        self.to_inclusive
    }

    pub fn overlaps(&self, other: &CommitmentPeriod) -> bool {
        self.from_exclusive < other.to_inclusive && other.from_exclusive < self.to_inclusive
    }

    /// Ticks at every epoch-aligned multiple of `interval` strictly within
    /// `(from_exclusive, to_inclusive]`.
    pub fn ticks(&self, interval: Duration) -> Vec<Timestamp> {
        let interval_micros = interval.as_micros() as i64;
        if interval_micros <= 0 {
            return vec![];
        }
        let mut ticks = Vec::new();
        let mut next = self.from_exclusive.align_down(interval);
        if next <= self.from_exclusive {
            next = Timestamp::from_micros(next.as_micros() + interval_micros);
        }
        while next <= self.to_inclusive {
            ticks.push(next);
            next = Timestamp::from_micros(next.as_micros() + interval_micros);
        }
        ticks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcsCommitmentMessage {
    pub domain_id: DomainId,
    pub sender: MemberName,
    pub counter_participant: MemberName,
    pub period: CommitmentPeriod,
    pub commitment_bytes: Vec<u8>,
}

/// A commitment message as received off the wire, typically signed. Kept distinct from
/// `AcsCommitmentMessage` because `storeReceived` must accept differing
/// candidate commitments from the same peer/period — the
/// signature travels with each candidate so a later audit can tell them
/// apart even if the payload bytes collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAcsCommitment {
    pub message: AcsCommitmentMessage,
    pub signature: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_align_to_interval() {
        let period = CommitmentPeriod::new(Timestamp::from_micros(0), Timestamp::from_micros(15_000_000)).unwrap();
        let ticks = period.ticks(Duration::from_secs(5));
        assert_eq!(
            ticks,
            vec![Timestamp::from_micros(5_000_000), Timestamp::from_micros(10_000_000), Timestamp::from_micros(15_000_000)]
        );
    }

    #[test]
    fn overlap_detection() {
        let a = CommitmentPeriod::new(Timestamp::from_micros(0), Timestamp::from_micros(10)).unwrap();
        let b = CommitmentPeriod::new(Timestamp::from_micros(5), Timestamp::from_micros(15)).unwrap();
        let c = CommitmentPeriod::new(Timestamp::from_micros(10), Timestamp::from_micros(20)).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
