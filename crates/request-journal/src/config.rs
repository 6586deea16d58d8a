//! Typed configuration for the request journal.

use domain::request::RequestCounter;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The journal's initial request counter; inserting below this value is
    /// an `IllegalArgument`.
    pub genesis_rc: RequestCounter,
}

impl Default for Config {
    fn default() -> Self {
        Self { genesis_rc: RequestCounter(0) }
    }
}
