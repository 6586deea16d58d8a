//! Outstanding-period tracking: an in-memory algebra over
//! per-peer sets of non-overlapping commitment periods still owed, plus the
//! "computed and sent" horizon that bounds how far `noOutstandingCommitments`
//! may advance.
//!
//! Rebuilt from durable `storeComputed`/`storeReceived` rows on startup
//! rather than persisted itself — an in-process working set reconstructed
//! from committed writes rather than serialized directly.

use std::collections::BTreeMap;

use domain::{
    commitment::CommitmentPeriod,
    member::MemberName,
    Timestamp,
};

#[derive(Debug, Clone)]
pub struct OutstandingTracker {
    outstanding: BTreeMap<MemberName, Vec<CommitmentPeriod>>,
    /// The largest `toInclusive` ever passed to `markComputedAndSent`;
    /// `Timestamp::MIN` until the first call.
    computed_and_sent_through: Timestamp,
}

impl Default for OutstandingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OutstandingTracker {
    pub fn new() -> Self {
        Self { outstanding: BTreeMap::new(), computed_and_sent_through: Timestamp::MIN }
    }

    /// Declares `period` owed with every peer in `peers`.
    /// Union-merges with any existing outstanding range for that peer.
    pub fn mark_outstanding(&mut self, period: CommitmentPeriod, peers: &[MemberName]) {
        for peer in peers {
            let ranges = self.outstanding.entry(peer.clone()).or_default();
            ranges.push(period);
            *ranges = merge(std::mem::take(ranges));
        }
    }

    /// Marks `period` reconciled for `peer`, splitting any overlapping
    /// outstanding range so the remainder is the set difference.
    pub fn mark_safe(&mut self, peer: &MemberName, period: CommitmentPeriod) {
        let Some(ranges) = self.outstanding.get_mut(peer) else { return };
        let remaining: Vec<CommitmentPeriod> = ranges.drain(..).flat_map(|existing| subtract(existing, period)).collect();
        if remaining.is_empty() {
            self.outstanding.remove(peer);
        } else {
            self.outstanding.insert(peer.clone(), remaining);
        }
    }

    /// Every `(peer, period)` pair still outstanding and intersecting
    /// `[ts_low, ts_high]`, optionally restricted to one peer.
    pub fn outstanding(&self, ts_low: Timestamp, ts_high: Timestamp, peer: Option<&MemberName>) -> Vec<(MemberName, CommitmentPeriod)> {
        let window = CommitmentPeriod { from_exclusive: ts_low, to_inclusive: ts_high };
        self.outstanding
            .iter()
            .filter(|(p, _)| peer.is_none_or(|wanted| *p == wanted))
            .flat_map(|(p, ranges)| ranges.iter().filter(|r| r.overlaps(&window)).map(move |r| (p.clone(), *r)))
            .collect()
    }

    pub fn mark_computed_and_sent(&mut self, period: CommitmentPeriod) {
        if period.to_inclusive > self.computed_and_sent_through {
            self.computed_and_sent_through = period.to_inclusive;
        }
    }

    /// Largest `ts <= end_of_time` such that every period with `toInclusive
    /// <= ts` is either not outstanding or marked safe.
    pub fn no_outstanding_commitments(&self, end_of_time: Timestamp) -> anyhow::Result<Timestamp> {
        let earliest_still_outstanding = self.outstanding.values().flatten().map(|p| p.to_inclusive).min();
        let clean_through_bound = match earliest_still_outstanding {
            Some(blocking) => blocking.pred()?,
            None => Timestamp::MAX,
        };
        Ok(end_of_time.min(self.computed_and_sent_through).min(clean_through_bound))
    }
}

/// Union-merges a list of (possibly overlapping or touching) periods into a
/// minimal sorted, disjoint set.
fn merge(mut periods: Vec<CommitmentPeriod>) -> Vec<CommitmentPeriod> {
    periods.sort_by_key(|p| p.from_exclusive);
    let mut merged: Vec<CommitmentPeriod> = Vec::with_capacity(periods.len());
    for p in periods {
        match merged.last_mut() {
            Some(last) if p.from_exclusive <= last.to_inclusive => {
                if p.to_inclusive > last.to_inclusive {
                    last.to_inclusive = p.to_inclusive;
                }
            },
            _ => merged.push(p),
        }
    }
    merged
}

/// `existing` minus `safe`, as zero, one, or two remaining periods.
fn subtract(existing: CommitmentPeriod, safe: CommitmentPeriod) -> Vec<CommitmentPeriod> {
    if !existing.overlaps(&safe) {
        return vec![existing];
    }
    let mut remainder = Vec::new();
    if existing.from_exclusive < safe.from_exclusive {
        remainder.push(CommitmentPeriod { from_exclusive: existing.from_exclusive, to_inclusive: safe.from_exclusive });
    }
    if existing.to_inclusive > safe.to_inclusive {
        remainder.push(CommitmentPeriod { from_exclusive: safe.to_inclusive, to_inclusive: existing.to_inclusive });
    }
    remainder
}
