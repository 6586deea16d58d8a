//! Request-journal-specific typed errors not already shared via
//! `domain::errors`.

use domain::request::RequestCounter;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IllegalArgument {
    #[error("request counter {rc:?} already exists in the journal")]
    AlreadyInserted { rc: RequestCounter },
    #[error("request counter {rc:?} is below the journal's initial value {genesis:?}")]
    BelowGenesis { rc: RequestCounter, genesis: RequestCounter },
}
