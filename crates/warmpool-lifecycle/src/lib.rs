//! warmpool-lifecycle: per-instance scale-up and scale-down decisions.
//!
//! Every pool instance runs a [`LifecycleController`] on a periodic tick.
//! There is no coordinator: each instance reads the same registry snapshot
//! and only the instance holding the smallest identifier in the relevant
//! group acts.
//!
//! # Algorithm
//!
//! ```text
//! scale up (spawn a sibling):
//!     unoccupied_count >= reserve          -> nothing to do
//!     now - last_spawn_attempt < cooldown  -> wait for the last spawn to register
//!     lowest_connected_id != self          -> not the spawner
//!     otherwise                            -> last_spawn_attempt = now; spawn
//!
//! scale down (exit this process):
//!     self occupied                        -> still serving
//!     unoccupied_count <= reserve          -> needed for the reserve
//!     idle < grace period                  -> might be needed again soon
//!     lowest_unconnected_id != self        -> not the one to go
//!     otherwise                            -> terminate
//! ```
//!
//! With nobody connected there is no spawner, so the pool does not grow
//! through this path until the first connection arrives.

pub mod controller;
pub mod launcher;
pub mod occupancy;

pub use controller::{LifecycleController, ScaleDownDecision, ScaleUpDecision};
pub use launcher::{SystemLauncher, TeardownHook, strip_listen_args};
pub use occupancy::OccupancyTracker;
