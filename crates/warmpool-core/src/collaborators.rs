//! Interfaces the lifecycle controller consumes.
//!
//! The controller never talks to the host directly. It reads pool state
//! through [`PoolRegistry`], its own rank through [`IdentityProvider`],
//! its occupancy through [`OccupancyProbe`], and acts through
//! [`ProcessLauncher`].

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::error::RegistryResult;
use crate::types::{InstanceId, PoolSnapshot};

/// Cross-process view of the pool.
///
/// Reads are best-effort; callers must tolerate stale data.
pub trait PoolRegistry: Send + Sync {
    /// Number of live instances not serving a connection.
    fn unoccupied_count(&self) -> RegistryResult<u32>;

    /// Smallest identifier among occupied instances.
    fn lowest_connected_id(&self) -> RegistryResult<Option<InstanceId>>;

    /// Smallest identifier among unoccupied instances.
    fn lowest_unconnected_id(&self) -> RegistryResult<Option<InstanceId>>;

    /// All three values at once.
    ///
    /// The default issues three separate reads. Registries that can read
    /// atomically should override it.
    fn snapshot(&self) -> RegistryResult<PoolSnapshot> {
        Ok(PoolSnapshot {
            unoccupied_count: self.unoccupied_count()?,
            lowest_connected_id: self.lowest_connected_id()?,
            lowest_unconnected_id: self.lowest_unconnected_id()?,
        })
    }
}

/// Supplies this process's identifier. Stable for the process lifetime.
pub trait IdentityProvider: Send + Sync {
    fn self_id(&self) -> InstanceId;
}

impl IdentityProvider for InstanceId {
    fn self_id(&self) -> InstanceId {
        *self
    }
}

/// Locally authoritative occupancy of this instance.
pub trait OccupancyProbe: Send + Sync {
    /// Whether this instance is bound to an active connection.
    fn is_occupied(&self) -> bool;

    /// Time since the instance last became idle. Zero while occupied.
    fn idle_duration(&self) -> Duration;
}

/// Starts sibling processes and ends the current one.
pub trait ProcessLauncher: Send + Sync {
    /// Start `executable` without waiting for it to initialise.
    fn spawn_sibling(&self, executable: &Path) -> io::Result<()>;

    /// End the current process.
    ///
    /// Production launchers do not return from this call.
    fn terminate_self(&self);
}
