//! Sortable string key encoding for the `acs_changes` table:
//! `(cid, toc, kind)` ordered so `scan_prefix` returns a single contract's
//! full change history in its required total order — ascending `ts`,
//! activations before deactivations at equal `ts`, `rc` as final tiebreak.

use domain::acs::{
    ContractId,
    TimeOfChange,
};

/// Flips the sign bit so two's-complement ordering becomes unsigned
/// ordering, matching `sequencer_store::keys::ts_key`.
fn ts_key(ts: domain::Timestamp) -> String {
    let signed = ts.as_micros();
    let unsigned = (signed as u64) ^ 0x8000_0000_0000_0000;
    format!("{unsigned:016x}")
}

fn rc_key(rc: u64) -> String {
    format!("{rc:020}")
}

pub fn cid_prefix(cid: &ContractId) -> String {
    format!("{}/", cid.0)
}

/// `is_deactivation` sorts after activation at equal `ts`.
pub fn change_key(cid: &ContractId, toc: TimeOfChange, is_deactivation: bool) -> String {
    format!("{}{}/{}/{}", cid_prefix(cid), ts_key(toc.ts), is_deactivation as u8, rc_key(toc.rc.0))
}

/// Global prefix (all cids) for `changes_between`/`package_usage`-style full
/// scans.
pub const ALL: &str = "";

#[cfg(test)]
mod tests {
    use domain::request::RequestCounter;

    use super::*;

    #[test]
    fn change_key_orders_activation_before_deactivation_at_equal_ts() {
        let cid = ContractId("c1".to_string());
        let toc = TimeOfChange { rc: RequestCounter(0), ts: domain::Timestamp::from_micros(10) };
        let activation = change_key(&cid, toc, false);
        let deactivation = change_key(&cid, toc, true);
        assert!(activation < deactivation);
    }

    #[test]
    fn change_key_orders_by_ts_then_rc() {
        let cid = ContractId("c1".to_string());
        let earlier = change_key(
            &cid,
            TimeOfChange { rc: RequestCounter(5), ts: domain::Timestamp::from_micros(1) },
            false,
        );
        let later = change_key(
            &cid,
            TimeOfChange { rc: RequestCounter(0), ts: domain::Timestamp::from_micros(2) },
            false,
        );
        assert!(earlier < later);
    }
}
