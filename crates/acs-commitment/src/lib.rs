//! ACS Commitment Engine: tracks which commitment periods are
//! still owed to which peers, persists computed/received commitment
//! history, reconciles the two, and exposes an in-memory commitment queue
//! and incremental ACS snapshot store for the reconciliation loop above it.

pub mod config;
pub mod engine;
pub mod errors;
pub mod keys;
pub mod metrics;
pub mod outstanding;
pub mod queue;
pub mod snapshot;

pub use domain::commitment::{
    AcsCommitmentMessage,
    CommitmentPeriod,
    SignedAcsCommitment,
};
pub use engine::{
    AcsCommitmentEngine,
    ReconciliationOutcome,
};
pub use errors::CommitmentConflict;
pub use outstanding::OutstandingTracker;
pub use queue::CommitmentQueue;
pub use snapshot::{
    IncrementalAcsSnapshotStore,
    RecordTime,
    StakeholderPair,
};
