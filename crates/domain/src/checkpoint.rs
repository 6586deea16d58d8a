//! Member counter checkpoints and acknowledgements.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    member::MemberId,
    Timestamp,
};

/// `(memberId, counter, ts, latestTopologyClientTs?)`. Counter is a per-
/// member dense sequence of events delivered to that member; two rows at
/// the same `(memberId, counter)` must agree on `ts` and
/// `latestTopologyClientTs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCounterCheckpoint {
    pub member_id: MemberId,
    pub counter: u64,
    pub ts: Timestamp,
    pub latest_topology_client_ts: Option<Timestamp>,
}

/// `(memberId, ts)`, monotonic: only ever advances forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub member_id: MemberId,
    pub ts: Timestamp,
}
