//! Active Contract Store data model.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    request::RequestCounter,
    Timestamp,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcsStatus {
    Active,
    Archived,
    TransferredAway(DomainId),
}

impl AcsStatus {
    /// Only `Archived` and `TransferredAway` rows are eligible for pruning.
    pub fn is_prunable(&self) -> bool {
        !matches!(self, AcsStatus::Active)
    }
}

/// `(rc, ts)`, totally orders ACS changes; within equal `ts`, activations
/// precede deactivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfChange {
    pub rc: RequestCounter,
    pub ts: Timestamp,
}

impl TimeOfChange {
    /// Sort key realizing the `(ts, rc, isDeactivation)` total order: at
    /// equal `ts` an activation always precedes a deactivation, and `rc` is
    /// the final tiebreak.
    pub fn sort_key(&self, is_deactivation: bool) -> (Timestamp, ChangeKindOrdPublic, RequestCounter) {
        (
            self.ts,
            if is_deactivation { ChangeKindOrdPublic::Deactivation } else { ChangeKindOrdPublic::Activation },
            self.rc,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKindOrdPublic {
    Activation,
    Deactivation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivenessChangeDetail {
    Create,
    Archive,
    TransferIn { origin: DomainId },
    TransferOut { target: DomainId },
}

impl ActivenessChangeDetail {
    pub fn is_deactivation(&self) -> bool {
        matches!(self, ActivenessChangeDetail::Archive | ActivenessChangeDetail::TransferOut { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcsChange {
    pub cid: ContractId,
    pub toc: TimeOfChange,
    pub detail: ActivenessChangeDetail,
}

/// Non-fatal diagnostics raised alongside an otherwise-successful ACS
/// mutation. Open question (b): `ChangeBeforeCreation` /
/// `ChangeAfterArchival` are disjoint from the `Double*` warnings for the
/// same offending change — an implementation must pick exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcsWarning {
    DoubleContractCreation { cid: ContractId, first: TimeOfChange, second: TimeOfChange },
    DoubleContractArchival { cid: ContractId, first: TimeOfChange, second: TimeOfChange },
    SimultaneousActivation { cid: ContractId, toc: TimeOfChange },
    SimultaneousDeactivation { cid: ContractId, toc: TimeOfChange },
    ChangeBeforeCreation { cid: ContractId, creation: TimeOfChange, change: TimeOfChange },
    ChangeAfterArchival { cid: ContractId, archival: TimeOfChange, change: TimeOfChange },
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AcsError {
    #[error("contract {cid:?} is already {status:?} as of {toc:?}")]
    InvalidStateTransition { cid: ContractId, status: String, toc: TimeOfChange },
}

/// Outcome of a mutating ACS operation: zero or more warnings plus at most
/// one fatal error.
#[derive(Debug, Clone, Default)]
pub struct AcsChecked {
    pub warnings: Vec<AcsWarning>,
    pub error: Option<AcsError>,
}

impl AcsChecked {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_warning(mut self, w: AcsWarning) -> Self {
        self.warnings.push(w);
        self
    }

    pub fn with_error(mut self, e: AcsError) -> Self {
        self.error = Some(e);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.error.is_some()
    }
}
