//! Multi-log-publisher-specific typed errors, wrapped into `anyhow` at the
//! crate boundary with the shared `errors::ErrorMetadata` taxonomy.

use domain::acs::DomainId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "local offset {local_offset} for domain {domain_id:?} is not strictly greater than the last published \
     offset {last_published:?}"
)]
pub struct LocalOffsetOutOfOrder {
    pub domain_id: DomainId,
    pub local_offset: u64,
    pub last_published: Option<u64>,
}
