//! Genesis defaults used when the journal has never recorded a clean
//! request.

use domain::{
    request::RequestCounter,
    Timestamp,
};

use crate::SequencerCounter;

#[derive(Debug, Clone)]
pub struct Config {
    pub genesis_rc: RequestCounter,
    pub genesis_sc: SequencerCounter,
}

impl Default for Config {
    fn default() -> Self {
        Self { genesis_rc: RequestCounter(0), genesis_sc: SequencerCounter(0) }
    }
}

impl Config {
    /// The distinguished minimum timestamp used when no clean request has
    /// ever been recorded.
    pub fn genesis_ts(&self) -> Timestamp {
        Timestamp::MIN
    }
}
