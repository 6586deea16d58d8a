//! Sortable string key encoding for the `acs_commitments_computed` /
//! `acs_commitments_received` tables: `(peer, toInclusive,
//! fromExclusive, ...)` ordered so range scans over a peer's history come
//! back in period order, matching `sequencer_store::keys::ts_key`.

use domain::{
    commitment::CommitmentPeriod,
    member::MemberName,
    Timestamp,
};

fn ts_key(ts: Timestamp) -> String {
    let signed = ts.as_micros();
    let unsigned = (signed as u64) ^ 0x8000_0000_0000_0000;
    format!("{unsigned:016x}")
}

fn period_key(period: &CommitmentPeriod) -> String {
    format!("{}/{}", ts_key(period.to_inclusive), ts_key(period.from_exclusive))
}

pub fn peer_prefix(peer: &MemberName) -> String {
    format!("{}/", peer.0)
}

pub fn computed_key(peer: &MemberName, period: &CommitmentPeriod) -> String {
    format!("{}{}", peer_prefix(peer), period_key(period))
}

/// Received commitments are multi-valued per `(peer, period)` (differing
/// candidates are kept, not rejected); `content_hash` disambiguates distinct
/// payloads at the same key.
pub fn received_key(peer: &MemberName, period: &CommitmentPeriod, content_hash: u64) -> String {
    format!("{}{}/{:016x}", peer_prefix(peer), period_key(period), content_hash)
}

pub const ALL: &str = "";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_key_orders_by_period_within_peer() {
        let peer = MemberName("A".to_string());
        let earlier = computed_key(&peer, &CommitmentPeriod { from_exclusive: Timestamp::from_micros(0), to_inclusive: Timestamp::from_micros(5) });
        let later = computed_key(&peer, &CommitmentPeriod { from_exclusive: Timestamp::from_micros(5), to_inclusive: Timestamp::from_micros(10) });
        assert!(earlier < later);
    }
}
