//! Typed conflict/ordering errors shared by the engines in this workspace,
//! wrapped into `anyhow` at crate boundaries with the shared
//! [`errors::ErrorMetadata`] taxonomy.

use runtime::InstanceDiscriminator;
use thiserror::Error;

use crate::{
    event::WriterIndex,
    member::MemberId,
    request::RequestCounter,
    Timestamp,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("payload {id:?} already exists with a different instance discriminator {other_discriminator:?}")]
pub struct ConflictingPayloadId {
    pub id: Timestamp,
    pub other_discriminator: InstanceDiscriminator,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatermarkError {
    #[error("watermark for writer {writer_index:?} unexpectedly changed to {actual_ts:?} (expected {expected_ts:?})")]
    UnexpectedlyChanged { writer_index: WriterIndex, expected_ts: Timestamp, actual_ts: Timestamp },
    #[error("watermark for writer {writer_index:?} was flagged offline by another writer")]
    FlaggedOffline { writer_index: WriterIndex },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "counter checkpoint for member {member_id:?} counter {counter:?} already recorded as (ts={stored_ts:?}, \
     topo={stored_topology_client_ts:?})"
)]
pub struct CounterCheckpointInconsistent {
    pub member_id: MemberId,
    pub counter: u64,
    pub stored_ts: Timestamp,
    pub stored_topology_client_ts: Option<Timestamp>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("request {rc:?} was not in the expected predecessor state")]
pub struct ConcurrentModification {
    pub rc: RequestCounter,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("request {rc:?} timestamp mismatch: stored {stored:?}, called with {called_with:?}")]
pub struct InconsistentTimestamps {
    pub rc: RequestCounter,
    pub stored: Timestamp,
    pub called_with: Timestamp,
}
