//! Sortable key encoding for the `request_journal` table.

use domain::request::RequestCounter;

pub fn rc_key(rc: RequestCounter) -> String {
    format!("{:020}", rc.0)
}
