//! Sortable string key encodings for the abstract KV tables this crate owns
//!.

use domain::acs::DomainId;

pub fn global_offset_key(offset: u64) -> String {
    format!("{offset:020}")
}

pub fn domain_key(domain_id: &DomainId) -> String {
    domain_id.0.clone()
}

/// Composite `(domainId, localOffset)` key for the dedup table, ordered
/// first by domain then by local offset.
pub fn dedup_key(domain_id: &DomainId, local_offset: u64) -> String {
    format!("{}/{local_offset:020}", domain_key(domain_id))
}

pub fn dedup_prefix(domain_id: &DomainId) -> String {
    format!("{}/", domain_key(domain_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_offset_key_preserves_order() {
        let keys = vec![global_offset_key(0), global_offset_key(1), global_offset_key(9), global_offset_key(10)];
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn dedup_key_sorts_by_domain_then_offset() {
        let a = DomainId("domainA".to_string());
        let b = DomainId("domainB".to_string());
        let mut keys = vec![dedup_key(&b, 0), dedup_key(&a, 5), dedup_key(&a, 10), dedup_key(&b, 1)];
        let expected = keys.clone();
        keys.sort();
        assert_eq!(keys, expected);
    }
}
