//! Registry: membership view over the state store.
//!
//! Tracks pool instances, their occupancy, and detects instances that
//! stopped sending heartbeats (crashed or killed without deregistering).
//! Implements [`PoolRegistry`] so the lifecycle controller can read it.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use warmpool_core::{InstanceId, PoolRegistry, PoolSnapshot, RegistryResult};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::InstanceRecord;

/// Liveness of a registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Live,
    Stale,
}

/// A registry record together with its liveness.
#[derive(Debug, Clone)]
pub struct Member {
    pub record: InstanceRecord,
    pub status: MemberStatus,
}

/// Pool membership backed by a [`StateStore`].
#[derive(Clone)]
pub struct Registry {
    state: StateStore,
    /// Records without a heartbeat for this long are treated as gone.
    heartbeat_timeout: Duration,
}

impl Registry {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            heartbeat_timeout: Duration::from_secs(30),
        }
    }

    /// Set the stale-record detection timeout.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Register this process. Returns the record with its new identifier.
    pub fn join(&self, pid: u32, address: Option<String>) -> StateResult<InstanceRecord> {
        let record = self.state.register_instance(pid, address, epoch_secs())?;
        info!(
            id = %record.id,
            pid,
            address = record.address.as_deref().unwrap_or("-"),
            "instance joined pool"
        );
        Ok(record)
    }

    /// Refresh the heartbeat of an instance.
    ///
    /// Returns false if the record is gone (for example reaped by a peer).
    pub fn heartbeat(&self, id: InstanceId) -> StateResult<bool> {
        let now = epoch_secs();
        let found = self.state.update_instance(id, |r| r.last_heartbeat = now)?;
        if found {
            debug!(%id, "heartbeat");
        } else {
            warn!(%id, "heartbeat for unknown instance");
        }
        Ok(found)
    }

    /// Publish an occupancy transition.
    ///
    /// Becoming unoccupied restarts the idle clock.
    pub fn set_occupied(&self, id: InstanceId, occupied: bool) -> StateResult<bool> {
        let now = epoch_secs();
        let found = self.state.update_instance(id, |r| {
            if r.occupied && !occupied {
                r.idle_since = now;
            }
            r.occupied = occupied;
            r.last_heartbeat = now;
        })?;
        if found {
            debug!(%id, occupied, "occupancy updated");
        } else {
            warn!(%id, occupied, "occupancy update for unknown instance");
        }
        Ok(found)
    }

    /// Remove an instance from the pool.
    pub fn leave(&self, id: InstanceId) -> StateResult<bool> {
        let existed = self.state.delete_instance(id)?;
        if existed {
            info!(%id, "instance left pool");
        }
        Ok(existed)
    }

    /// List all registered instances with their liveness.
    pub fn list_members(&self) -> StateResult<Vec<Member>> {
        let now = epoch_secs();
        let timeout = self.heartbeat_timeout.as_secs();
        let members = self
            .state
            .list_instances()?
            .into_iter()
            .map(|record| {
                let status = if record.is_stale(now, timeout) {
                    MemberStatus::Stale
                } else {
                    MemberStatus::Live
                };
                Member { record, status }
            })
            .collect();
        Ok(members)
    }

    /// Remove records of instances that stopped sending heartbeats.
    ///
    /// Returns the removed identifiers.
    pub fn reap_stale(&self) -> StateResult<Vec<InstanceId>> {
        let reaped = self
            .state
            .delete_stale(epoch_secs(), self.heartbeat_timeout.as_secs())?;
        for id in &reaped {
            warn!(%id, "reaped stale instance");
        }
        Ok(reaped)
    }

    /// Snapshot of live instances.
    pub fn live_snapshot(&self) -> StateResult<PoolSnapshot> {
        self.state
            .snapshot(epoch_secs(), self.heartbeat_timeout.as_secs())
    }
}

impl PoolRegistry for Registry {
    fn unoccupied_count(&self) -> RegistryResult<u32> {
        Ok(self.live_snapshot()?.unoccupied_count)
    }

    fn lowest_connected_id(&self) -> RegistryResult<Option<InstanceId>> {
        Ok(self.live_snapshot()?.lowest_connected_id)
    }

    fn lowest_unconnected_id(&self) -> RegistryResult<Option<InstanceId>> {
        Ok(self.live_snapshot()?.lowest_unconnected_id)
    }

    fn snapshot(&self) -> RegistryResult<PoolSnapshot> {
        Ok(self.live_snapshot()?)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
