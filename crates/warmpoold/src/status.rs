//! The `status` and `reap` subcommands.

use anyhow::Context;
use warmpool_core::{PoolConfig, PoolSnapshot};
use warmpool_state::{Member, MemberStatus, Registry, StateStore};

fn open_registry(config: &PoolConfig) -> anyhow::Result<Registry> {
    let store = StateStore::open(&config.registry_path)
        .with_context(|| format!("opening registry {}", config.registry_path.display()))?;
    Ok(Registry::new(store).with_heartbeat_timeout(config.heartbeat_timeout()))
}

pub fn print_status(config: &PoolConfig, json: bool) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let snapshot = registry.live_snapshot()?;
    let members = registry.list_members()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status_json(&snapshot, &members))?);
    } else {
        print!("{}", render_table(config, &snapshot, &members));
    }
    Ok(())
}

pub fn reap(config: &PoolConfig) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let reaped = registry.reap_stale()?;
    if reaped.is_empty() {
        println!("no stale instances");
    }
    for id in reaped {
        println!("reaped {id}");
    }
    Ok(())
}

fn status_json(snapshot: &PoolSnapshot, members: &[Member]) -> serde_json::Value {
    let instances: Vec<serde_json::Value> = members
        .iter()
        .map(|m| {
            serde_json::json!({
                "record": m.record,
                "live": m.status == MemberStatus::Live,
            })
        })
        .collect();
    serde_json::json!({
        "snapshot": snapshot,
        "instances": instances,
    })
}

fn render_table(config: &PoolConfig, snapshot: &PoolSnapshot, members: &[Member]) -> String {
    let id_or_dash = |id: Option<warmpool_core::InstanceId>| {
        id.map_or_else(|| "-".to_string(), |id| id.to_string())
    };

    let mut out = String::new();
    out.push_str(&format!(
        "unoccupied: {} (reserve {})\nlowest connected: {}\nlowest unconnected: {}\n\n",
        snapshot.unoccupied_count,
        config.min_unoccupied_reserve,
        id_or_dash(snapshot.lowest_connected_id),
        id_or_dash(snapshot.lowest_unconnected_id),
    ));
    out.push_str(&format!(
        "{:>6}  {:>8}  {:<22}  {:<10}  {:<5}\n",
        "ID", "PID", "ADDRESS", "STATE", "LIVE"
    ));
    for m in members {
        let state = if m.record.occupied { "occupied" } else { "idle" };
        let live = if m.status == MemberStatus::Live { "yes" } else { "no" };
        out.push_str(&format!(
            "{:>6}  {:>8}  {:<22}  {:<10}  {:<5}\n",
            m.record.id,
            m.record.pid,
            m.record.address.as_deref().unwrap_or("-"),
            state,
            live,
        ));
    }
    out
}
