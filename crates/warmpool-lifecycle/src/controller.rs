//! Lifecycle controller: decides, per tick, whether this instance should
//! spawn a sibling or terminate itself.
//!
//! Reads the pool snapshot from the registry and this instance's local
//! occupancy, applies the reserve policy, and calls the launcher. Only the
//! spawn timestamp is kept between ticks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use warmpool_core::{
    Clock, IdentityProvider, InstanceId, OccupancyProbe, PoolRegistry, PoolSnapshot,
    ProcessLauncher, ReservePolicy, SystemClock,
};

/// Outcome of a scale-up evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleUpDecision {
    /// Enough unoccupied instances already.
    ReserveSatisfied,
    /// This instance attempted a spawn too recently.
    CoolingDown { remaining: Duration },
    /// Another instance (or none, when nobody is connected) is the spawner.
    NotElected { leader: Option<InstanceId> },
    /// The registry could not be read this tick.
    RegistryUnavailable,
    /// A sibling launch was requested.
    Spawned,
}

impl ScaleUpDecision {
    pub fn is_spawn(&self) -> bool {
        matches!(self, ScaleUpDecision::Spawned)
    }
}

/// Outcome of a scale-down evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDownDecision {
    /// Serving a connection.
    Occupied,
    /// The registry could not be read this tick.
    RegistryUnavailable,
    /// Leaving would drop the pool to or below the reserve.
    ReserveAtRisk,
    /// Not idle long enough yet.
    GracePeriod { remaining: Duration },
    /// Another unoccupied instance has the lower identifier.
    NotElected { leader: Option<InstanceId> },
    /// Termination was requested.
    Terminated,
}

impl ScaleDownDecision {
    pub fn is_terminate(&self) -> bool {
        matches!(self, ScaleDownDecision::Terminated)
    }
}

/// Per-instance reserve controller.
pub struct LifecycleController {
    policy: ReservePolicy,
    self_id: InstanceId,
    /// Executable started for new siblings.
    executable: PathBuf,
    registry: Arc<dyn PoolRegistry>,
    occupancy: Arc<dyn OccupancyProbe>,
    launcher: Arc<dyn ProcessLauncher>,
    clock: Arc<dyn Clock>,
    /// Last time this instance attempted a spawn. Starts at construction.
    last_spawn_attempt_at: Instant,
}

impl LifecycleController {
    /// Create a controller for this instance.
    pub fn new(
        policy: ReservePolicy,
        identity: &dyn IdentityProvider,
        registry: Arc<dyn PoolRegistry>,
        occupancy: Arc<dyn OccupancyProbe>,
        launcher: Arc<dyn ProcessLauncher>,
        executable: impl Into<PathBuf>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            policy,
            self_id: identity.self_id(),
            executable: executable.into(),
            registry,
            occupancy,
            launcher,
            last_spawn_attempt_at: clock.now(),
            clock,
        }
    }

    /// Use a different time source.
    ///
    /// Restarts the spawn cooldown from the new clock's current time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.last_spawn_attempt_at = clock.now();
        self.clock = clock;
        self
    }

    pub fn self_id(&self) -> InstanceId {
        self.self_id
    }

    pub fn policy(&self) -> &ReservePolicy {
        &self.policy
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Spawn a sibling if the pool is short of unoccupied instances and
    /// this instance is the elected spawner.
    pub fn evaluate_scale_up(&mut self) -> ScaleUpDecision {
        let snapshot = match self.registry.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(id = %self.self_id, error = %e, "registry read failed, skipping scale-up");
                return ScaleUpDecision::RegistryUnavailable;
            }
        };

        let now = self.clock.now();
        let decision = self.scale_up_decision(&snapshot, now);
        match &decision {
            ScaleUpDecision::Spawned => {
                self.last_spawn_attempt_at = now;
                info!(
                    id = %self.self_id,
                    unoccupied = snapshot.unoccupied_count,
                    reserve = self.policy.min_unoccupied_reserve,
                    executable = %self.executable.display(),
                    "starting new instance"
                );
                if let Err(e) = self.launcher.spawn_sibling(&self.executable) {
                    warn!(
                        id = %self.self_id,
                        executable = %self.executable.display(),
                        error = %e,
                        "failed to start new instance"
                    );
                }
            }
            ScaleUpDecision::ReserveSatisfied => {
                debug!(unoccupied = snapshot.unoccupied_count, "no instances needed, enough free instances");
            }
            ScaleUpDecision::CoolingDown { remaining } => {
                debug!(remaining_ms = remaining.as_millis() as u64, "recent spawn attempt, waiting");
            }
            ScaleUpDecision::NotElected { leader } => {
                debug!(id = %self.self_id, ?leader, "not my business to start new instances");
            }
            ScaleUpDecision::RegistryUnavailable => {}
        }
        decision
    }

    /// Terminate this process if it is an idle, surplus instance and the
    /// elected one to go.
    pub fn evaluate_scale_down(&mut self) -> ScaleDownDecision {
        if self.occupancy.is_occupied() {
            debug!(id = %self.self_id, "occupied, still needed");
            return ScaleDownDecision::Occupied;
        }

        let snapshot = match self.registry.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(id = %self.self_id, error = %e, "registry read failed, skipping scale-down");
                return ScaleDownDecision::RegistryUnavailable;
            }
        };

        let idle = self.occupancy.idle_duration();
        let decision = self.scale_down_decision(&snapshot, idle);
        match &decision {
            ScaleDownDecision::Terminated => {
                info!(
                    id = %self.self_id,
                    idle_secs = idle.as_secs(),
                    unoccupied = snapshot.unoccupied_count,
                    "shutting down this instance"
                );
                self.launcher.terminate_self();
            }
            ScaleDownDecision::ReserveAtRisk => {
                debug!(unoccupied = snapshot.unoccupied_count, "needed for new connections");
            }
            ScaleDownDecision::GracePeriod { remaining } => {
                debug!(remaining_secs = remaining.as_secs(), "not idle long enough for shutdown");
            }
            ScaleDownDecision::NotElected { leader } => {
                debug!(id = %self.self_id, ?leader, "not my turn to shut down");
            }
            ScaleDownDecision::Occupied | ScaleDownDecision::RegistryUnavailable => {}
        }
        decision
    }

    /// Run one scale-up and one scale-down evaluation.
    pub fn tick(&mut self) -> (ScaleUpDecision, ScaleDownDecision) {
        let up = self.evaluate_scale_up();
        let down = self.evaluate_scale_down();
        (up, down)
    }

    /// Run the controller loop until `shutdown` flips.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            id = %self.self_id,
            interval_ms = interval.as_millis() as u64,
            reserve = self.policy.min_unoccupied_reserve,
            "lifecycle controller started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    info!(id = %self.self_id, "lifecycle controller shutting down");
                    break;
                }
            }
        }
    }

    fn scale_up_decision(&self, snapshot: &PoolSnapshot, now: Instant) -> ScaleUpDecision {
        if snapshot.unoccupied_count >= self.policy.min_unoccupied_reserve {
            return ScaleUpDecision::ReserveSatisfied;
        }
        let since_last = now.saturating_duration_since(self.last_spawn_attempt_at);
        if since_last < self.policy.spawn_cooldown {
            return ScaleUpDecision::CoolingDown {
                remaining: self.policy.spawn_cooldown - since_last,
            };
        }
        if snapshot.lowest_connected_id != Some(self.self_id) {
            return ScaleUpDecision::NotElected {
                leader: snapshot.lowest_connected_id,
            };
        }
        ScaleUpDecision::Spawned
    }

    fn scale_down_decision(&self, snapshot: &PoolSnapshot, idle: Duration) -> ScaleDownDecision {
        if snapshot.unoccupied_count <= self.policy.min_unoccupied_reserve {
            return ScaleDownDecision::ReserveAtRisk;
        }
        if idle < self.policy.shutdown_grace_period {
            return ScaleDownDecision::GracePeriod {
                remaining: self.policy.shutdown_grace_period - idle,
            };
        }
        if snapshot.lowest_unconnected_id != Some(self.self_id) {
            return ScaleDownDecision::NotElected {
                leader: snapshot.lowest_unconnected_id,
            };
        }
        ScaleDownDecision::Terminated
    }
}
