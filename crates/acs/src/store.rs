//! Active Contract Store operations. Every mutating call
//! appends an immutable `(cid, toc, detail)` row rather than overwriting a
//! single current-state row, so the full change history survives for
//! `changesBetween`/`snapshot` even after the "current" status has moved on
//! — the same append-only discipline `sequencer-store` uses for events.

use std::collections::{
    BTreeMap,
    HashMap,
    HashSet,
};

use async_trait::async_trait;
use domain::{
    acs::{
        ActivenessChangeDetail,
        AcsChange,
        AcsChecked,
        AcsError,
        AcsStatus,
        AcsWarning,
        ContractId,
        DomainId,
        PackageId,
        TimeOfChange,
    },
    request::RequestCounter,
    Timestamp,
};
use persistence::{
    ConflictStrategy,
    Persistence,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    config::Config,
    keys,
    metrics::AcsMetrics,
};

const CHANGES_TABLE: &str = "acs_changes";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChange {
    cid: ContractId,
    toc: TimeOfChange,
    detail: ActivenessChangeDetail,
}

/// Looks up which package (if any) a contract instance belongs to, so
/// `package_usage` can answer "is any active contract still referencing
/// this package" without the ACS itself needing to understand Daml package
/// ids.
#[async_trait]
pub trait ContractPackageLookup: Send + Sync {
    async fn package_of(&self, cid: &ContractId) -> anyhow::Result<Option<PackageId>>;
}

#[derive(Clone)]
pub struct ActiveContractStore {
    persistence: Box<dyn Persistence>,
    config: Config,
    metrics: std::sync::Arc<AcsMetrics>,
}

impl ActiveContractStore {
    pub fn new(persistence: Box<dyn Persistence>, config: Config) -> Self {
        Self { persistence, config, metrics: std::sync::Arc::new(AcsMetrics::default()) }
    }

    pub fn metrics(&self) -> &AcsMetrics {
        &self.metrics
    }

    // ---- Mutations ----

    pub async fn create_contracts(&self, cids: &[ContractId], toc: TimeOfChange) -> anyhow::Result<AcsChecked> {
        self.apply_many(cids, toc, |_| ActivenessChangeDetail::Create).await
    }

    pub async fn archive_contracts(&self, cids: &[ContractId], toc: TimeOfChange) -> anyhow::Result<AcsChecked> {
        self.apply_many(cids, toc, |_| ActivenessChangeDetail::Archive).await
    }

    pub async fn transfer_in_contracts(
        &self,
        transfers: &[(ContractId, DomainId)],
        toc: TimeOfChange,
    ) -> anyhow::Result<AcsChecked> {
        let mut merged = AcsChecked::ok();
        for (cid, origin) in transfers {
            let detail = ActivenessChangeDetail::TransferIn { origin: origin.clone() };
            let checked = self.apply_one(cid, toc, detail).await?;
            merge(&mut merged, checked);
        }
        Ok(merged)
    }

    pub async fn transfer_out_contracts(
        &self,
        transfers: &[(ContractId, DomainId)],
        toc: TimeOfChange,
    ) -> anyhow::Result<AcsChecked> {
        let mut merged = AcsChecked::ok();
        for (cid, target) in transfers {
            let detail = ActivenessChangeDetail::TransferOut { target: target.clone() };
            let checked = self.apply_one(cid, toc, detail).await?;
            merge(&mut merged, checked);
        }
        Ok(merged)
    }

    async fn apply_many(
        &self,
        cids: &[ContractId],
        toc: TimeOfChange,
        detail_for: impl Fn(&ContractId) -> ActivenessChangeDetail,
    ) -> anyhow::Result<AcsChecked> {
        let mut merged = AcsChecked::ok();
        for cid in cids {
            let checked = self.apply_one(cid, toc, detail_for(cid)).await?;
            merge(&mut merged, checked);
        }
        Ok(merged)
    }

    /// Applies one `(cid, toc, detail)` change; idempotent if an identical
    /// row already exists. Otherwise classifies warnings against the
    /// cid's existing history and appends the new row regardless — ACS
    /// history is immutable and append-only even for out-of-order or
    /// conflicting writes, since higher layers (the request journal replay)
    /// rely on being able to reconstruct exactly what was recorded.
    async fn apply_one(&self, cid: &ContractId, toc: TimeOfChange, detail: ActivenessChangeDetail) -> anyhow::Result<AcsChecked> {
        let history = self.history(cid).await?;

        if history.iter().any(|c| c.toc == toc && c.detail == detail) {
            return Ok(AcsChecked::ok());
        }

        let mut checked = AcsChecked::ok();
        let is_deactivation = detail.is_deactivation();

        // Fatal: the exact same (rc, ts) cannot be both an activation and a
        // deactivation for the same contract.
        if let Some(clash) = history.iter().find(|c| c.toc == toc && c.detail.is_deactivation() != is_deactivation) {
            checked = checked.with_error(AcsError::InvalidStateTransition {
                cid: cid.clone(),
                status: format!("{:?}", clash.detail),
                toc,
            });
            self.metrics.record_fatal_error();
            self.insert_change(cid, toc, detail).await?;
            return Ok(checked);
        }

        let same_kind_same_variant = |existing: &ActivenessChangeDetail| variant_eq(existing, &detail);

        if let Some(conflict) = history.iter().find(|c| same_kind_same_variant(&c.detail) && c.toc != toc) {
            let warning = if is_deactivation {
                AcsWarning::DoubleContractArchival { cid: cid.clone(), first: min_toc(conflict.toc, toc), second: max_toc(conflict.toc, toc) }
            } else {
                AcsWarning::DoubleContractCreation { cid: cid.clone(), first: min_toc(conflict.toc, toc), second: max_toc(conflict.toc, toc) }
            };
            checked = checked.with_warning(warning);
            self.metrics.record_warning();
        } else if let Some(simultaneous) =
            history.iter().find(|c| c.detail.is_deactivation() == is_deactivation && c.toc == toc && c.detail != detail)
        {
            let _ = simultaneous;
            let warning = if is_deactivation {
                AcsWarning::SimultaneousDeactivation { cid: cid.clone(), toc }
            } else {
                AcsWarning::SimultaneousActivation { cid: cid.clone(), toc }
            };
            checked = checked.with_warning(warning);
            self.metrics.record_warning();
        } else {
            // ChangeBeforeCreation / ChangeAfterArchival only apply when this
            // change didn't already trigger a Double*/Simultaneous warning
            //.
            let creation_toc = history.iter().find(|c| c.detail == ActivenessChangeDetail::Create).map(|c| c.toc);
            let archival_toc = history.iter().filter(|c| c.detail == ActivenessChangeDetail::Archive).map(|c| c.toc).max();
            if let Some(creation) = creation_toc {
                if toc < creation {
                    checked = checked.with_warning(AcsWarning::ChangeBeforeCreation { cid: cid.clone(), creation, change: toc });
                    self.metrics.record_warning();
                }
            }
            if let Some(archival) = archival_toc {
                if toc > archival {
                    checked = checked.with_warning(AcsWarning::ChangeAfterArchival { cid: cid.clone(), archival, change: toc });
                    self.metrics.record_warning();
                }
            }
        }

        self.insert_change(cid, toc, detail).await?;
        self.metrics.record_change_applied();
        Ok(checked)
    }

    async fn insert_change(&self, cid: &ContractId, toc: TimeOfChange, detail: ActivenessChangeDetail) -> anyhow::Result<()> {
        let is_deactivation = detail.is_deactivation();
        let key = keys::change_key(cid, toc, is_deactivation);
        let stored = StoredChange { cid: cid.clone(), toc, detail };
        self.persistence
            .bulk_insert(CHANGES_TABLE, vec![(key, serde_json::to_value(&stored)?)], ConflictStrategy::Overwrite, self.config.max_batch_size)
            .await?;
        Ok(())
    }

    async fn history(&self, cid: &ContractId) -> anyhow::Result<Vec<StoredChange>> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(CHANGES_TABLE, &keys::cid_prefix(cid)).await?;
        self.persistence.commit(tx).await?;
        rows.into_iter().map(|(_, v)| serde_json::from_value(v).map_err(Into::into)).collect()
    }

    // ---- Queries ----

    /// Latest `(status, toc)` for each existing cid.
    pub async fn fetch_states(&self, cids: &[ContractId]) -> anyhow::Result<HashMap<ContractId, (AcsStatus, TimeOfChange)>> {
        let mut out = HashMap::new();
        for cid in cids {
            let history = self.history(cid).await?;
            if let Some(latest) = history.last() {
                out.insert(cid.clone(), (status_of(&latest.detail), latest.toc));
            }
        }
        Ok(out)
    }

    /// `Active` contracts at `ts`: the set of cids whose last change at or
    /// before `(ts, MAX, deactivation)` is an activation.
    pub async fn snapshot(&self, ts: Timestamp) -> anyhow::Result<HashMap<ContractId, Timestamp>> {
        let all = self.all_changes().await?;
        Ok(snapshot_from(&all, ts, None))
    }

    pub async fn contract_snapshot(&self, cids: &[ContractId], ts: Timestamp) -> anyhow::Result<HashMap<ContractId, Timestamp>> {
        let all = self.all_changes().await?;
        let wanted: HashSet<_> = cids.iter().cloned().collect();
        Ok(snapshot_from(&all, ts, Some(&wanted)))
    }

    /// Lazily-ordered `(toc, {activations, deactivations})` sequence over
    /// `(fromExclusive, toInclusive]`. Returned eagerly as a
    /// `Vec` — this store's scale doesn't warrant true lazy iteration, but
    /// the ordering and grouping contract match the spec's "lazy ordered
    /// sequence".
    pub async fn changes_between(&self, from_exclusive: Timestamp, to_inclusive: Timestamp) -> anyhow::Result<Vec<(TimeOfChange, AcsChange)>> {
        let all = self.all_changes().await?;
        let mut grouped: BTreeMap<(Timestamp, u8, u64), Vec<StoredChange>> = BTreeMap::new();
        for c in all {
            if c.toc.ts > from_exclusive && c.toc.ts <= to_inclusive {
                grouped.entry((c.toc.ts, c.detail.is_deactivation() as u8, c.toc.rc.0)).or_default().push(c);
            }
        }
        let mut out = Vec::new();
        for changes in grouped.into_values() {
            for c in changes {
                out.push((c.toc, AcsChange { cid: c.cid, toc: c.toc, detail: c.detail }));
            }
        }
        Ok(out)
    }

    /// Any currently-active cid referencing `package_id`, or `None`.
    pub async fn package_usage(&self, package_id: PackageId, lookup: &dyn ContractPackageLookup) -> anyhow::Result<Option<ContractId>> {
        let active = self.snapshot(Timestamp::MAX).await?;
        for cid in active.keys() {
            if lookup.package_of(cid).await?.is_some_and(|p| p == package_id) {
                return Ok(Some(cid.clone()));
            }
        }
        Ok(None)
    }

    async fn all_changes(&self) -> anyhow::Result<Vec<StoredChange>> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(CHANGES_TABLE, keys::ALL).await?;
        self.persistence.commit(tx).await?;
        rows.into_iter().map(|(_, v)| serde_json::from_value(v).map_err(Into::into)).collect()
    }

    // ---- Pruning / replay repair ----

    /// Deletes rows whose latest status is prunable AND whose last change is
    /// `<= bound`.
    pub async fn do_prune(&self, before_and_including: Timestamp) -> anyhow::Result<usize> {
        let all = self.all_changes().await?;
        let mut by_cid: BTreeMap<ContractId, Vec<StoredChange>> = BTreeMap::new();
        for c in all {
            by_cid.entry(c.cid.clone()).or_default().push(c);
        }
        let mut pruned = 0usize;
        let mut tx = self.persistence.begin().await?;
        for (cid, history) in by_cid {
            let Some(latest) = history.last() else { continue };
            let status = status_of(&latest.detail);
            if status.is_prunable() && latest.toc.ts <= before_and_including {
                pruned += tx.delete_prefix(CHANGES_TABLE, &keys::cid_prefix(&cid)).await?;
            }
        }
        self.persistence.commit(tx).await?;
        self.metrics.record_contracts_pruned(pruned as u64);
        Ok(pruned)
    }

    /// Bulk delete of all changes with `rc >= bound`.
    pub async fn delete_since(&self, bound: RequestCounter) -> anyhow::Result<usize> {
        let all = self.all_changes().await?;
        let mut tx = self.persistence.begin().await?;
        let mut deleted = 0usize;
        for c in all {
            if c.toc.rc >= bound {
                let key = keys::change_key(&c.cid, c.toc, c.detail.is_deactivation());
                tx.delete(CHANGES_TABLE, &key).await?;
                deleted += 1;
            }
        }
        self.persistence.commit(tx).await?;
        Ok(deleted)
    }
}

fn merge(into: &mut AcsChecked, from: AcsChecked) {
    into.warnings.extend(from.warnings);
    if into.error.is_none() {
        into.error = from.error;
    }
}

fn min_toc(a: TimeOfChange, b: TimeOfChange) -> TimeOfChange {
    if a.sort_key(false) <= b.sort_key(false) {
        a
    } else {
        b
    }
}

fn max_toc(a: TimeOfChange, b: TimeOfChange) -> TimeOfChange {
    if a.sort_key(false) >= b.sort_key(false) {
        a
    } else {
        b
    }
}

fn variant_eq(a: &ActivenessChangeDetail, b: &ActivenessChangeDetail) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn status_of(detail: &ActivenessChangeDetail) -> AcsStatus {
    match detail {
        ActivenessChangeDetail::Create | ActivenessChangeDetail::TransferIn { .. } => AcsStatus::Active,
        ActivenessChangeDetail::Archive => AcsStatus::Archived,
        ActivenessChangeDetail::TransferOut { target } => AcsStatus::TransferredAway(target.clone()),
    }
}

/// Snapshot formula shared by `snapshot`/`contract_snapshot`: for each cid, the last change at or before `(ts, MAX_RC,
/// deactivation)` wins; the result includes the cid iff that change is an
/// activation, mapped to the timestamp of that activation.
fn snapshot_from(all: &[StoredChange], ts: Timestamp, restrict: Option<&HashSet<ContractId>>) -> HashMap<ContractId, Timestamp> {
    let bound = (ts, true, u64::MAX);
    let mut by_cid: BTreeMap<ContractId, &StoredChange> = BTreeMap::new();
    for c in all {
        if let Some(wanted) = restrict {
            if !wanted.contains(&c.cid) {
                continue;
            }
        }
        let key = (c.toc.ts, c.detail.is_deactivation(), c.toc.rc.0);
        if key > bound {
            continue;
        }
        match by_cid.get(&c.cid) {
            Some(existing) => {
                let existing_key = (existing.toc.ts, existing.detail.is_deactivation(), existing.toc.rc.0);
                if key > existing_key {
                    by_cid.insert(c.cid.clone(), c);
                }
            },
            None => {
                by_cid.insert(c.cid.clone(), c);
            },
        }
    }
    by_cid
        .into_iter()
        .filter_map(|(cid, c)| (!c.detail.is_deactivation()).then_some((cid, c.toc.ts)))
        .collect()
}

#[cfg(test)]
mod tests {
    use domain::request::RequestCounter;
    use persistence_memory::MemoryPersistence;

    use super::*;

    fn store() -> ActiveContractStore {
        ActiveContractStore::new(Box::new(MemoryPersistence::new()), Config::default())
    }

    fn toc(rc: u64, ts: i64) -> TimeOfChange {
        TimeOfChange { rc: RequestCounter(rc), ts: Timestamp::from_micros(ts) }
    }

    fn cid(s: &str) -> ContractId {
        ContractId(s.to_string())
    }

    /// Snapshot correctness across a mix of create/transfer-out/transfer-in/
    /// archive operations on the same contract.
    #[tokio::test]
    async fn s3_mixed_operations_snapshot() {
        let store = store();
        let c1 = cid("c1");
        let t1 = toc(1, 10);
        let t2 = toc(2, 20);
        let t3 = toc(3, 30);
        let t4 = toc(4, 40);

        store.create_contracts(&[c1.clone()], t1).await.unwrap();
        store.transfer_out_contracts(&[(c1.clone(), DomainId("other".into()))], t2).await.unwrap();
        store.transfer_in_contracts(&[(c1.clone(), DomainId("other".into()))], t3).await.unwrap();
        store.archive_contracts(&[c1.clone()], t4).await.unwrap();

        assert_eq!(store.snapshot(t1.ts).await.unwrap().get(&c1), Some(&t1.ts));
        assert!(store.snapshot(t2.ts).await.unwrap().is_empty());
        assert_eq!(store.snapshot(t3.ts).await.unwrap().get(&c1), Some(&t3.ts));
        assert!(store.snapshot(t4.ts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_identical_call_is_idempotent_without_warnings() {
        let store = store();
        let c1 = cid("c1");
        let t1 = toc(1, 10);
        let first = store.create_contracts(&[c1.clone()], t1).await.unwrap();
        let second = store.create_contracts(&[c1.clone()], t1).await.unwrap();
        assert!(first.warnings.is_empty());
        assert!(second.warnings.is_empty());
        assert!(!second.is_fatal());
    }

    #[tokio::test]
    async fn double_creation_at_different_toc_warns() {
        let store = store();
        let c1 = cid("c1");
        store.create_contracts(&[c1.clone()], toc(1, 10)).await.unwrap();
        let checked = store.create_contracts(&[c1.clone()], toc(2, 20)).await.unwrap();
        assert_eq!(checked.warnings.len(), 1);
        assert!(matches!(checked.warnings[0], AcsWarning::DoubleContractCreation { .. }));
    }

    #[tokio::test]
    async fn simultaneous_activation_with_differing_detail_warns() {
        let store = store();
        let c1 = cid("c1");
        let t = toc(1, 10);
        store.create_contracts(&[c1.clone()], t).await.unwrap();
        let checked = store.transfer_in_contracts(&[(c1.clone(), DomainId("x".into()))], t).await.unwrap();
        assert_eq!(checked.warnings.len(), 1);
        assert!(matches!(checked.warnings[0], AcsWarning::SimultaneousActivation { .. }));
    }

    #[tokio::test]
    async fn change_before_creation_warns() {
        let store = store();
        let c1 = cid("c1");
        store.create_contracts(&[c1.clone()], toc(5, 50)).await.unwrap();
        let checked = store.archive_contracts(&[c1.clone()], toc(1, 10)).await.unwrap();
        assert_eq!(checked.warnings.len(), 1);
        assert!(matches!(checked.warnings[0], AcsWarning::ChangeBeforeCreation { .. }));
    }

    #[tokio::test]
    async fn change_after_archival_warns() {
        let store = store();
        let c1 = cid("c1");
        store.create_contracts(&[c1.clone()], toc(1, 10)).await.unwrap();
        store.archive_contracts(&[c1.clone()], toc(2, 20)).await.unwrap();
        let checked = store.transfer_in_contracts(&[(c1.clone(), DomainId("x".into()))], toc(3, 30)).await.unwrap();
        assert_eq!(checked.warnings.len(), 1);
        assert!(matches!(checked.warnings[0], AcsWarning::ChangeAfterArchival { .. }));
    }

    #[tokio::test]
    async fn activation_and_deactivation_at_identical_toc_is_fatal() {
        let store = store();
        let c1 = cid("c1");
        let t = toc(1, 10);
        store.create_contracts(&[c1.clone()], t).await.unwrap();
        let checked = store.archive_contracts(&[c1.clone()], t).await.unwrap();
        assert!(checked.is_fatal());
    }

    #[tokio::test]
    async fn changes_between_respects_exclusive_inclusive_bounds() {
        let store = store();
        let c1 = cid("c1");
        store.create_contracts(&[c1.clone()], toc(1, 10)).await.unwrap();
        store.archive_contracts(&[c1.clone()], toc(2, 20)).await.unwrap();
        let changes = store.changes_between(Timestamp::from_micros(10), Timestamp::from_micros(20)).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1.detail, ActivenessChangeDetail::Archive);
    }

    struct FixedPackageLookup(HashMap<ContractId, PackageId>);

    #[async_trait]
    impl ContractPackageLookup for FixedPackageLookup {
        async fn package_of(&self, cid: &ContractId) -> anyhow::Result<Option<PackageId>> {
            Ok(self.0.get(cid).copied())
        }
    }

    #[tokio::test]
    async fn package_usage_finds_active_contract_referencing_package() {
        let store = store();
        let c1 = cid("c1");
        let c2 = cid("c2");
        store.create_contracts(&[c1.clone(), c2.clone()], toc(1, 10)).await.unwrap();
        store.archive_contracts(&[c1.clone()], toc(2, 20)).await.unwrap();
        let lookup = FixedPackageLookup(HashMap::from([(c1.clone(), PackageId(7)), (c2.clone(), PackageId(7))]));
        let found = store.package_usage(PackageId(7), &lookup).await.unwrap();
        assert_eq!(found, Some(c2));
    }

    #[tokio::test]
    async fn prune_removes_only_archived_contracts_before_bound() {
        let store = store();
        let archived = cid("archived");
        let active = cid("active");
        store.create_contracts(&[archived.clone(), active.clone()], toc(1, 10)).await.unwrap();
        store.archive_contracts(&[archived.clone()], toc(2, 20)).await.unwrap();
        let pruned = store.do_prune(Timestamp::from_micros(20)).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(store.fetch_states(&[archived]).await.unwrap().is_empty());
        assert!(!store.fetch_states(&[active]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_since_removes_changes_at_or_after_rc() {
        let store = store();
        let c1 = cid("c1");
        store.create_contracts(&[c1.clone()], toc(1, 10)).await.unwrap();
        store.archive_contracts(&[c1.clone()], toc(5, 50)).await.unwrap();
        let deleted = store.delete_since(RequestCounter(5)).await.unwrap();
        assert_eq!(deleted, 1);
        let states = store.fetch_states(&[c1]).await.unwrap();
        assert_eq!(states.values().next().unwrap().0, AcsStatus::Active);
    }
}
