//! Payload identity and the instance-discriminator fencing scheme.

use runtime::InstanceDiscriminator;
use serde::{
    Deserialize,
    Serialize,
};

use crate::Timestamp;

/// A `PayloadId` is a timestamp drawn from a per-writer-partition space, so
/// IDs minted by distinct writers (each using a fresh `InstanceDiscriminator`
/// per process lifetime) cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PayloadId(pub Timestamp);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub id: PayloadId,
    pub content: Vec<u8>,
    pub instance_discriminator: InstanceDiscriminator,
}
