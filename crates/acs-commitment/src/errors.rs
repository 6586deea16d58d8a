//! Error taxonomy specific to the ACS Commitment Engine.

use domain::{
    commitment::CommitmentPeriod,
    member::MemberName,
};

#[derive(Debug, thiserror::Error)]
#[error("computed commitment for peer {peer} over {period:?} already stored with different bytes")]
pub struct CommitmentConflict {
    pub peer: MemberName,
    pub period: CommitmentPeriod,
}
