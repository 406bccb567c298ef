//! warmpool-core: shared types for a self-scaling pool of identical
//! processes.
//!
//! The pool keeps a small reserve of unoccupied instances. Every instance
//! runs the same controller, which reads the shared registry through the
//! traits in [`collaborators`] and decides locally whether to spawn a
//! sibling or exit.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{IdentityProvider, OccupancyProbe, PoolRegistry, ProcessLauncher};
pub use config::PoolConfig;
pub use error::{ConfigError, RegistryError, RegistryResult};
pub use types::*;
