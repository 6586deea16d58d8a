//! Request journal data model.

use serde::{
    Deserialize,
    Serialize,
};

use crate::Timestamp;

/// Dense per-domain integer identifying a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestCounter(pub u64);

impl RequestCounter {
    pub fn succ(&self) -> RequestCounter {
        RequestCounter(self.0 + 1)
    }
}

/// Tags a request as a repair (out-of-band correction) rather than ordinary
/// protocol traffic; repairs sharing a tombstone timestamp advance cursors
/// without rewinding sequencer-counter preheads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairContext {
    pub tombstone_ts: Timestamp,
    pub description: String,
}

/// `Pending < Confirmed < Clean`, a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestState {
    Pending = 0,
    Confirmed = 1,
    Clean = 2,
}

impl RequestState {
    /// The only state this one may legally transition to next, used to
    /// validate `transit`/`terminate` preconditions.
    pub fn next(&self) -> Option<RequestState> {
        match self {
            RequestState::Pending => Some(RequestState::Confirmed),
            RequestState::Confirmed => Some(RequestState::Clean),
            RequestState::Clean => None,
        }
    }

    /// Only `Pending` and `Clean` carry cursor preheads.
    pub fn is_cursor_bearing(&self) -> bool {
        matches!(self, RequestState::Pending | RequestState::Clean)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    pub rc: RequestCounter,
    pub state: RequestState,
    pub request_ts: Timestamp,
    pub commit_ts: Option<Timestamp>,
    pub repair_context: Option<RepairContext>,
}

impl RequestData {
    pub fn is_repair(&self) -> bool {
        self.repair_context.is_some()
    }
}
