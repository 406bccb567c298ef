//! Persisted registry records.

use serde::{Deserialize, Serialize};
use warmpool_core::InstanceId;

/// One registered pool instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: InstanceId,
    /// OS process ID of the instance.
    pub pid: u32,
    /// Address the instance accepts its connection on (ip:port).
    pub address: Option<String>,
    /// True while serving a connection.
    pub occupied: bool,
    /// Unix timestamp of the last transition to unoccupied.
    pub idle_since: u64,
    /// Unix timestamp of registration.
    pub registered_at: u64,
    /// Unix timestamp of the last heartbeat or occupancy update.
    pub last_heartbeat: u64,
}

impl InstanceRecord {
    /// Whether the record's heartbeat is older than `timeout_secs` at `now`.
    pub fn is_stale(&self, now: u64, timeout_secs: u64) -> bool {
        now.saturating_sub(self.last_heartbeat) > timeout_secs
    }
}
