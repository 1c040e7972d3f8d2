//! Mirror (peer) records (§3).

use serde::{Deserialize, Serialize};

/// Name reserved for the admin/API virtual origin (§4.8, §3).
pub const RESERVED_MIRROR_NAME: &str = "web";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    pub address: String,
    pub lifesign: i64,
}

impl Mirror {
    pub fn is_reserved_name(name: &str) -> bool {
        name == RESERVED_MIRROR_NAME
    }

    pub fn is_stale(&self, now: i64) -> bool {
        // Flagged "(inactive)" by the stats emitter past 600s (§4.7).
        now - self.lifesign > 600
    }
}
