//! Members: participants, mediators, sequencers, or unauthenticated
//! identities addressable by the sequencer.

use serde::{
    Deserialize,
    Serialize,
};

use crate::Timestamp;

/// Dense integer handle assigned on first registration; stable for the
/// member's lifetime even if later disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct MemberId(pub u64);

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberName(pub String);

impl From<&str> for MemberName {
    fn from(s: &str) -> Self {
        MemberName(s.to_string())
    }
}

impl std::fmt::Display for MemberName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: MemberName,
    pub registered_at: Timestamp,
    /// Soft-disabled members are never deleted; a
    /// never-seen member is treated the same as a disabled one.
    pub enabled: bool,
}

impl Member {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
