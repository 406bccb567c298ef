//! warmpool-state: the shared pool registry.
//!
//! Backed by [redb](https://docs.rs/redb). Every instance on a host opens
//! the same database file to register itself, report occupancy, send
//! heartbeats, and read the pool snapshot its controller decides on.
//!
//! # Architecture
//!
//! Instance records are JSON-serialized into redb's `&[u8]` value column,
//! keyed by their numeric identifier so a forward scan visits instances in
//! identifier order. A counter table hands out identifiers inside the same
//! write transaction that inserts the record.
//!
//! redb holds an exclusive lock on the file while a `Database` is open, so
//! the on-disk store opens the file per operation and backs off while a
//! peer holds it. The in-memory backend keeps one open handle and exists
//! for tests.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use registry::{Member, MemberStatus, Registry};
pub use store::StateStore;
pub use types::*;
