//! Shared types used across warmpool crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pool-wide unique identifier of an instance.
///
/// Assigned once by the registry when the process registers and never
/// reused. Identifiers are totally ordered; the smallest identifier in a
/// subset of peers is that subset's elected actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InstanceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Best-effort, point-in-time view of the pool as read from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Number of live instances not serving a connection.
    pub unoccupied_count: u32,
    /// Smallest identifier among occupied instances.
    pub lowest_connected_id: Option<InstanceId>,
    /// Smallest identifier among unoccupied instances.
    pub lowest_unconnected_id: Option<InstanceId>,
}

impl PoolSnapshot {
    /// Build a snapshot from `(id, occupied)` pairs.
    ///
    /// Used by registries that hold the whole instance list in memory.
    pub fn from_instances<I>(instances: I) -> Self
    where
        I: IntoIterator<Item = (InstanceId, bool)>,
    {
        let mut snapshot = Self::default();
        for (id, occupied) in instances {
            let slot = if occupied {
                &mut snapshot.lowest_connected_id
            } else {
                snapshot.unoccupied_count += 1;
                &mut snapshot.lowest_unconnected_id
            };
            *slot = Some(slot.map_or(id, |current| current.min(id)));
        }
        snapshot
    }
}

/// Tunables of the reserve controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservePolicy {
    /// Minimum number of unoccupied instances the pool tries to keep.
    pub min_unoccupied_reserve: u32,
    /// Minimum spacing between spawn attempts by one instance.
    pub spawn_cooldown: Duration,
    /// Minimum idle time before an instance may terminate itself.
    pub shutdown_grace_period: Duration,
}

impl Default for ReservePolicy {
    fn default() -> Self {
        Self {
            min_unoccupied_reserve: 1,
            spawn_cooldown: Duration::from_secs(5),
            shutdown_grace_period: Duration::from_secs(120),
        }
    }
}
