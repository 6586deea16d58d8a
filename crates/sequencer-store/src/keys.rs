//! Sortable string key encodings for the abstract KV tables this crate
//! owns. `Persistence::scan_prefix` iterates in lexical key
//! order, so every key that needs to sort the way its underlying `i64`/`u64`
//! does gets a fixed-width, sign-flipped hex encoding here.

use domain::{
    event::WriterIndex,
    member::MemberId,
    Timestamp,
};

/// Flips the sign bit so two's-complement ordering becomes unsigned
/// ordering, then zero-pads to a fixed-width hex string: `Timestamp::MIN`
/// sorts first, `Timestamp::MAX` sorts last.
pub fn ts_key(ts: Timestamp) -> String {
    let signed = ts.as_micros();
    let unsigned = (signed as u64) ^ 0x8000_0000_0000_0000;
    format!("{unsigned:016x}")
}

pub fn writer_key(w: WriterIndex) -> String {
    format!("{:010}", w.0)
}

pub fn member_id_key(id: MemberId) -> String {
    format!("{:020}", id.0)
}

/// Composite `(memberId, counter)` key for the counter-checkpoint table,
/// ordered first by member then by counter.
pub fn checkpoint_key(member: MemberId, counter: u64) -> String {
    format!("{}/{counter:020}", member_id_key(member))
}

pub fn checkpoint_prefix(member: MemberId) -> String {
    format!("{}/", member_id_key(member))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_key_preserves_order() {
        let a = Timestamp::MIN;
        let b = Timestamp::from_micros(-1);
        let c = Timestamp::from_micros(0);
        let d = Timestamp::from_micros(1);
        let e = Timestamp::MAX;
        let keys = vec![ts_key(a), ts_key(b), ts_key(c), ts_key(d), ts_key(e)];
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn checkpoint_key_sorts_by_member_then_counter() {
        let m0 = MemberId(0);
        let m1 = MemberId(1);
        let mut keys =
            vec![checkpoint_key(m1, 0), checkpoint_key(m0, 5), checkpoint_key(m0, 10), checkpoint_key(m1, 1)];
        let expected = keys.clone();
        keys.sort();
        assert_eq!(keys, expected);
    }
}
