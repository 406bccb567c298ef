//! Connection acceptance and registry heartbeats.
//!
//! An instance serves one connection at a time. While it does, it is
//! occupied both locally and in the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use warmpool_core::{InstanceId, OccupancyProbe, ProcessLauncher};
use warmpool_lifecycle::OccupancyTracker;
use warmpool_state::Registry;

/// Accept connections until `shutdown` flips.
pub async fn serve(
    listener: TcpListener,
    id: InstanceId,
    registry: Registry,
    occupancy: OccupancyTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%id, error = %e, "accept failed");
                        continue;
                    }
                };

                if !occupancy.begin_session() {
                    debug!(%id, %peer, "already occupied, refusing connection");
                    let _ = stream.shutdown().await;
                    continue;
                }
                publish(&registry, id, true);
                info!(%id, %peer, "connection accepted");

                let registry = registry.clone();
                let occupancy = occupancy.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_session(stream).await {
                        debug!(%id, %peer, error = %e, "session ended with error");
                    }
                    occupancy.end_session();
                    publish(&registry, id, false);
                    info!(%id, %peer, "connection closed");
                });
            }
            _ = shutdown.changed() => {
                debug!(%id, "accept loop shutting down");
                break;
            }
        }
    }
}

/// Hold the connection, echoing input back until the peer closes it.
async fn run_session(mut stream: TcpStream) -> std::io::Result<u64> {
    let (mut reader, mut writer) = stream.split();
    tokio::io::copy(&mut reader, &mut writer).await
}

fn publish(registry: &Registry, id: InstanceId, occupied: bool) {
    if let Err(e) = registry.set_occupied(id, occupied) {
        warn!(%id, occupied, error = %e, "failed to publish occupancy");
    }
}

/// Refresh this instance's heartbeat and reap crashed peers every tick.
///
/// Stops once the instance has asked to exit.
pub async fn heartbeat_loop(
    id: InstanceId,
    registry: Registry,
    occupancy: OccupancyTracker,
    launcher: Arc<dyn ProcessLauncher>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if !heartbeat_once(id, &registry, &occupancy, launcher.as_ref()) {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// One heartbeat round. Returns false if the instance asked to exit.
///
/// A record that vanished (reaped by a peer after a stall) makes this
/// instance invisible to every snapshot, so it can never be elected to
/// leave. An idle instance in that state exits right away; an occupied
/// one keeps serving and exits on a later round once idle.
pub fn heartbeat_once(
    id: InstanceId,
    registry: &Registry,
    occupancy: &OccupancyTracker,
    launcher: &dyn ProcessLauncher,
) -> bool {
    match registry.heartbeat(id) {
        Ok(true) => {}
        Ok(false) if occupancy.is_occupied() => {
            warn!(%id, "registry record missing, exiting after the current connection");
        }
        Ok(false) => {
            warn!(%id, "registry record missing, shutting down this instance");
            launcher.terminate_self();
            return false;
        }
        Err(e) => warn!(%id, error = %e, "heartbeat failed"),
    }
    if let Err(e) = registry.reap_stale() {
        warn!(error = %e, "reaping stale instances failed");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warmpool_core::PoolRegistry;
    use warmpool_state::StateStore;

    #[derive(Default)]
    struct CountingLauncher {
        terminations: AtomicUsize,
    }

    impl ProcessLauncher for CountingLauncher {
        fn spawn_sibling(&self, _executable: &Path) -> std::io::Result<()> {
            Ok(())
        }
        fn terminate_self(&self) {
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Push a record's heartbeat far into the past and reap it.
    fn reap(registry: &Registry, id: InstanceId) {
        registry
            .state()
            .update_instance(id, |r| r.last_heartbeat = 1000)
            .unwrap();
        assert_eq!(registry.reap_stale().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn connection_marks_instance_occupied() {
        let registry = Registry::new(StateStore::open_in_memory().unwrap());
        let id = registry.join(1, None).unwrap().id;
        let occupancy = OccupancyTracker::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);

        let server = tokio::spawn(serve(listener, id, registry.clone(), occupancy.clone(), rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert!(occupancy.is_occupied());
        assert_eq!(registry.lowest_connected_id().unwrap(), Some(id));

        // A second client is turned away while the first is connected.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut rest = Vec::new();
        second.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(occupancy.is_occupied());

        drop(client);
        for _ in 0..100 {
            if !occupancy.is_occupied() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!occupancy.is_occupied());
        for _ in 0..100 {
            if registry.lowest_unconnected_id().unwrap() == Some(id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.lowest_unconnected_id().unwrap(), Some(id));

        tx.send(true).unwrap();
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_loop_stops_on_shutdown() {
        let registry = Registry::new(StateStore::open_in_memory().unwrap());
        let id = registry.join(1, None).unwrap().id;
        let launcher = Arc::new(CountingLauncher::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(heartbeat_loop(
            id,
            registry.clone(),
            OccupancyTracker::new(),
            launcher.clone(),
            Duration::from_secs(1),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(registry.list_members().unwrap().len(), 1);
        assert_eq!(launcher.terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reaped_idle_instance_exits() {
        let registry = Registry::new(StateStore::open_in_memory().unwrap());
        let one = registry.join(1, None).unwrap().id;
        let two = registry.join(2, None).unwrap().id;
        let three = registry.join(3, None).unwrap().id;
        reap(&registry, one);
        registry.leave(two).unwrap();

        // The pool no longer counts `one`; it would never be elected to leave.
        let snap = registry.snapshot().unwrap();
        assert_eq!(snap.unoccupied_count, 1);
        assert_eq!(snap.lowest_unconnected_id, Some(three));

        let launcher = CountingLauncher::default();
        let keep_going = heartbeat_once(one, &registry, &OccupancyTracker::new(), &launcher);

        assert!(!keep_going);
        assert_eq!(launcher.terminations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reaped_occupied_instance_finishes_its_connection_first() {
        let registry = Registry::new(StateStore::open_in_memory().unwrap());
        let id = registry.join(1, None).unwrap().id;
        reap(&registry, id);

        let occupancy = OccupancyTracker::new();
        let launcher = CountingLauncher::default();
        assert!(occupancy.begin_session());
        assert!(heartbeat_once(id, &registry, &occupancy, &launcher));
        assert_eq!(launcher.terminations.load(Ordering::SeqCst), 0);

        occupancy.end_session();
        assert!(!heartbeat_once(id, &registry, &occupancy, &launcher));
        assert_eq!(launcher.terminations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn live_instance_keeps_beating() {
        let registry = Registry::new(StateStore::open_in_memory().unwrap());
        let id = registry.join(1, None).unwrap().id;
        let launcher = CountingLauncher::default();

        assert!(heartbeat_once(id, &registry, &OccupancyTracker::new(), &launcher));
        assert_eq!(launcher.terminations.load(Ordering::SeqCst), 0);
    }
}
