//! Active Contract Store: a per-contract state store with
//! activation/deactivation lifecycle, transfer-in/out semantics,
//! conflict-detection reports, and timestamped snapshots.
//!
//! Uses an OCC-style conflict-checking pattern — reads detect concurrent
//! writers touching overlapping rows and report rather than silently
//! overwrite — generalized to a multi-event-per-contract history, where
//! every create/archive/transfer call appends an immutable `(toc, detail)`
//! row rather than replacing a single row in place.

pub mod config;
pub mod keys;
pub mod metrics;
pub mod store;

pub use domain::acs::{
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
};
pub use store::{
    ActiveContractStore,
    ContractPackageLookup,
};
