//! redb table definitions for the registry.

use redb::TableDefinition;

/// Instance records keyed by identifier.
pub const INSTANCES: TableDefinition<u64, &[u8]> = TableDefinition::new("instances");

/// Monotonic counters keyed by name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Counter holding the next identifier to hand out.
pub const NEXT_INSTANCE_ID: &str = "next_instance_id";
