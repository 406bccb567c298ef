//! StateStore: redb-backed persistence for the pool registry.
//!
//! Provides identifier allocation and typed CRUD over instance records,
//! plus the atomic snapshot read the lifecycle controller relies on. The
//! store supports an on-disk backend shared between processes and an
//! in-memory backend for testing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable};
use tracing::{debug, trace};
use warmpool_core::{InstanceId, PoolSnapshot};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::InstanceRecord;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Attempts to acquire the shared database file before giving up.
const OPEN_ATTEMPTS: u32 = 40;
const OPEN_BACKOFF_START: Duration = Duration::from_millis(2);
const OPEN_BACKOFF_MAX: Duration = Duration::from_millis(50);

#[derive(Clone)]
enum Backend {
    /// Database file shared with peer processes, opened per operation.
    Shared(Arc<PathBuf>),
    /// Single long-lived handle.
    Memory(Arc<Database>),
}

/// Thread-safe registry store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    backend: Backend,
}

impl StateStore {
    /// Open (or create) the shared registry file at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let store = Self {
            backend: Backend::Shared(Arc::new(path.to_path_buf())),
        };
        store.with_db(ensure_tables)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        ensure_tables(&db)?;
        debug!("in-memory state store opened");
        Ok(Self {
            backend: Backend::Memory(Arc::new(db)),
        })
    }

    /// Path of the shared database file, if on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Shared(path) => Some(path.as_path()),
            Backend::Memory(_) => None,
        }
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> StateResult<T>) -> StateResult<T> {
        match &self.backend {
            Backend::Memory(db) => f(db),
            Backend::Shared(path) => {
                let db = open_shared(path)?;
                f(&db)
            }
        }
    }

    // ── Registration ───────────────────────────────────────────────

    /// Allocate the next identifier and insert a fresh, unoccupied record.
    ///
    /// Both happen in one write transaction, so concurrent registrations
    /// never share an identifier.
    pub fn register_instance(
        &self,
        pid: u32,
        address: Option<String>,
        now: u64,
    ) -> StateResult<InstanceRecord> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            let record;
            {
                let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
                let next = counters
                    .get(NEXT_INSTANCE_ID)
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value())
                    .unwrap_or(1);
                counters
                    .insert(NEXT_INSTANCE_ID, next + 1)
                    .map_err(map_err!(Write))?;

                record = InstanceRecord {
                    id: InstanceId(next),
                    pid,
                    address,
                    occupied: false,
                    idle_since: now,
                    registered_at: now,
                    last_heartbeat: now,
                };
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                let mut instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                instances
                    .insert(next, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(id = %record.id, pid, "instance registered");
            Ok(record)
        })
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or replace an instance record.
    pub fn put_instance(&self, record: &InstanceRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                table
                    .insert(record.id.get(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(())
        })
    }

    /// Get an instance record by identifier.
    pub fn get_instance(&self, id: InstanceId) -> StateResult<Option<InstanceRecord>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            match table.get(id.get()).map_err(map_err!(Read))? {
                Some(guard) => Ok(Some(decode(guard.value())?)),
                None => Ok(None),
            }
        })
    }

    /// List all records in identifier order.
    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut results = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                results.push(decode(value.value())?);
            }
            Ok(results)
        })
    }

    /// Apply `f` to a record inside one write transaction.
    ///
    /// Returns false without writing if the record does not exist.
    pub fn update_instance<F>(&self, id: InstanceId, f: F) -> StateResult<bool>
    where
        F: FnOnce(&mut InstanceRecord),
    {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            let found;
            {
                let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                let current = table
                    .get(id.get())
                    .map_err(map_err!(Read))?
                    .map(|guard| decode(guard.value()))
                    .transpose()?;
                found = current.is_some();
                if let Some(mut record) = current {
                    f(&mut record);
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(id.get(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(found)
        })
    }

    /// Delete a record. Returns true if it existed.
    pub fn delete_instance(&self, id: InstanceId) -> StateResult<bool> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            let existed;
            {
                let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                existed = table.remove(id.get()).map_err(map_err!(Write))?.is_some();
            }
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(%id, existed, "instance deleted");
            Ok(existed)
        })
    }

    /// Delete every record whose heartbeat is older than `timeout_secs`.
    ///
    /// Returns the removed identifiers.
    pub fn delete_stale(&self, now: u64, timeout_secs: u64) -> StateResult<Vec<InstanceId>> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            let mut removed = Vec::new();
            {
                let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let record = decode(value.value())?;
                    if record.is_stale(now, timeout_secs) {
                        removed.push(record.id);
                    }
                }
                for id in &removed {
                    table.remove(id.get()).map_err(map_err!(Write))?;
                }
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(removed)
        })
    }

    // ── Snapshot ───────────────────────────────────────────────────

    /// Read the pool snapshot over live records in one read transaction.
    pub fn snapshot(&self, now: u64, timeout_secs: u64) -> StateResult<PoolSnapshot> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut live = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record = decode(value.value())?;
                if !record.is_stale(now, timeout_secs) {
                    live.push((record.id, record.occupied));
                }
            }
            Ok(PoolSnapshot::from_instances(live))
        })
    }
}

/// Create all tables if they don't exist yet.
fn ensure_tables(db: &Database) -> StateResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    // Opening a table in a write transaction creates it if absent.
    txn.open_table(INSTANCES).map_err(map_err!(Table))?;
    txn.open_table(COUNTERS).map_err(map_err!(Table))?;
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}

/// Open the shared file, backing off while a peer holds its lock.
fn open_shared(path: &Path) -> StateResult<Database> {
    let mut delay = OPEN_BACKOFF_START;
    for attempt in 1..=OPEN_ATTEMPTS {
        match Database::create(path) {
            Ok(db) => return Ok(db),
            Err(DatabaseError::DatabaseAlreadyOpen) => {
                trace!(?path, attempt, "registry locked by a peer, retrying");
                thread::sleep(delay);
                delay = (delay * 2).min(OPEN_BACKOFF_MAX);
            }
            Err(e) => return Err(StateError::Open(e.to_string())),
        }
    }
    Err(StateError::Busy(path.display().to_string()))
}

fn decode(bytes: &[u8]) -> StateResult<InstanceRecord> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}
