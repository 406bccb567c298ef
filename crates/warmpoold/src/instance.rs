//! The `run` subcommand: one pool instance from registration to exit.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use warmpool_core::{PoolConfig, ProcessLauncher};
use warmpool_lifecycle::{LifecycleController, OccupancyTracker, SystemLauncher};
use warmpool_state::{Registry, StateStore};

use crate::session;

pub async fn run(config: PoolConfig) -> anyhow::Result<()> {
    info!(
        registry = %config.registry_path.display(),
        reserve = config.min_unoccupied_reserve,
        "warmpool instance starting"
    );

    if let Some(parent) = config.registry_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating registry directory {}", parent.display()))?;
    }
    let store = StateStore::open(&config.registry_path)
        .with_context(|| format!("opening registry {}", config.registry_path.display()))?;
    let registry = Registry::new(store).with_heartbeat_timeout(config.heartbeat_timeout());

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    let address = listener.local_addr()?;

    let id = registry.join(std::process::id(), Some(address.to_string()))?.id;
    info!(%id, %address, "accepting connections");

    let executable = match &config.executable {
        Some(path) => path.clone(),
        None => std::env::current_exe().context("resolving the running executable")?,
    };
    let launcher = match &config.spawn_args {
        Some(args) => SystemLauncher::new(args.clone()),
        None => SystemLauncher::inherit_args(),
    };
    let teardown_registry = registry.clone();
    let launcher: Arc<dyn ProcessLauncher> = Arc::new(
        launcher
            .with_env("WARMPOOL_LISTEN", config.sibling_listen())
            .with_teardown(Box::new(move || {
                if let Err(e) = teardown_registry.leave(id) {
                    warn!(%id, error = %e, "failed to deregister before exit");
                }
            })),
    );

    let occupancy = OccupancyTracker::new();
    let mut controller = LifecycleController::new(
        config.policy(),
        &id,
        Arc::new(registry.clone()),
        Arc::new(occupancy.clone()),
        launcher.clone(),
        executable,
    );

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tick = config.tick_interval();

    let session_handle = tokio::spawn(session::serve(
        listener,
        id,
        registry.clone(),
        occupancy.clone(),
        shutdown_rx.clone(),
    ));

    let heartbeat_handle = tokio::spawn(session::heartbeat_loop(
        id,
        registry.clone(),
        occupancy,
        launcher,
        tick,
        shutdown_rx.clone(),
    ));

    let controller_shutdown = shutdown_rx.clone();
    let controller_handle = tokio::spawn(async move {
        controller.run(tick, controller_shutdown).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!(%id, "shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = session_handle.await;
    let _ = heartbeat_handle.await;
    let _ = controller_handle.await;

    registry.leave(id)?;
    info!(%id, "warmpool instance stopped");
    Ok(())
}
