//! Controller decisions over a real registry.
//!
//! Validates that instances sharing one registry file elect a single
//! spawner and a single instance to leave, and that the pool converges
//! once peers register and deregister.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use warmpool_core::{
    InstanceId, ManualClock, OccupancyProbe, PoolRegistry, ProcessLauncher, ReservePolicy,
};
use warmpool_lifecycle::{
    LifecycleController, OccupancyTracker, ScaleDownDecision, ScaleUpDecision,
};
use warmpool_state::{Registry, StateStore};

#[derive(Default)]
struct CountingLauncher {
    spawns: AtomicUsize,
    terminations: AtomicUsize,
}

impl ProcessLauncher for CountingLauncher {
    fn spawn_sibling(&self, _executable: &Path) -> io::Result<()> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn terminate_self(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

struct Instance {
    id: InstanceId,
    occupancy: OccupancyTracker,
    launcher: Arc<CountingLauncher>,
    controller: LifecycleController,
}

fn start_instance(registry: &Registry, clock: &ManualClock) -> Instance {
    let id = registry.join(std::process::id(), None).unwrap().id;
    let occupancy = OccupancyTracker::with_clock(Arc::new(clock.clone()));
    let launcher = Arc::new(CountingLauncher::default());
    let controller = LifecycleController::new(
        ReservePolicy::default(),
        &id,
        Arc::new(registry.clone()),
        Arc::new(occupancy.clone()),
        launcher.clone(),
        "warmpoold",
    )
    .with_clock(Arc::new(clock.clone()));
    Instance {
        id,
        occupancy,
        launcher,
        controller,
    }
}

fn connect(registry: &Registry, instance: &Instance) {
    assert!(instance.occupancy.begin_session());
    registry.set_occupied(instance.id, true).unwrap();
}

fn disconnect(registry: &Registry, instance: &Instance) {
    instance.occupancy.end_session();
    registry.set_occupied(instance.id, false).unwrap();
}

#[test]
fn idle_surplus_shrinks_one_instance_at_a_time() {
    let registry = Registry::new(StateStore::open_in_memory().unwrap());
    let clock = ManualClock::new();

    let mut a = start_instance(&registry, &clock);
    let mut b = start_instance(&registry, &clock);
    let mut c = start_instance(&registry, &clock);
    connect(&registry, &a);

    // b idle 150s, c idle 10s.
    clock.advance(Duration::from_secs(140));
    connect(&registry, &c);
    disconnect(&registry, &c);
    clock.advance(Duration::from_secs(10));

    assert_eq!(b.occupancy.idle_duration(), Duration::from_secs(150));
    assert_eq!(c.occupancy.idle_duration(), Duration::from_secs(10));

    assert_eq!(a.controller.evaluate_scale_down(), ScaleDownDecision::Occupied);
    assert_eq!(b.controller.evaluate_scale_down(), ScaleDownDecision::Terminated);
    assert!(!c.controller.evaluate_scale_down().is_terminate());

    // The terminating instance deregisters before exiting.
    registry.leave(b.id).unwrap();
    clock.advance(Duration::from_secs(600));

    // c is now the last idle instance and holds the reserve.
    assert_eq!(c.controller.evaluate_scale_down(), ScaleDownDecision::ReserveAtRisk);
    assert_eq!(b.launcher.terminations.load(Ordering::SeqCst), 1);
    assert_eq!(c.launcher.terminations.load(Ordering::SeqCst), 0);
}

#[test]
fn exhausted_reserve_is_refilled_by_lowest_connected() {
    let registry = Registry::new(StateStore::open_in_memory().unwrap());
    let clock = ManualClock::new();

    let mut four = start_instance(&registry, &clock);
    let mut five = start_instance(&registry, &clock);
    connect(&registry, &four);
    connect(&registry, &five);
    clock.advance(Duration::from_secs(10));

    assert_eq!(four.controller.evaluate_scale_up(), ScaleUpDecision::Spawned);
    assert_eq!(
        five.controller.evaluate_scale_up(),
        ScaleUpDecision::NotElected {
            leader: Some(four.id)
        }
    );

    // Next tick, before the sibling registered: cooldown holds.
    clock.advance(Duration::from_secs(2));
    assert!(matches!(
        four.controller.evaluate_scale_up(),
        ScaleUpDecision::CoolingDown { .. }
    ));

    // The sibling registers as unoccupied; the reserve is met again.
    let _sibling = start_instance(&registry, &clock);
    clock.advance(Duration::from_secs(10));
    assert_eq!(four.controller.evaluate_scale_up(), ScaleUpDecision::ReserveSatisfied);
    assert_eq!(four.launcher.spawns.load(Ordering::SeqCst), 1);
    assert_eq!(five.launcher.spawns.load(Ordering::SeqCst), 0);
}

#[test]
fn instances_on_separate_handles_agree_on_leaders() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.redb");
    let clock = ManualClock::new();

    let registry_one = Registry::new(StateStore::open(&path).unwrap());
    let registry_two = Registry::new(StateStore::open(&path).unwrap());

    let mut one = start_instance(&registry_one, &clock);
    let mut two = start_instance(&registry_two, &clock);
    let mut three = start_instance(&registry_two, &clock);
    clock.advance(Duration::from_secs(300));

    assert_eq!(registry_one.snapshot().unwrap(), registry_two.snapshot().unwrap());

    let terminated: Vec<InstanceId> = [&mut one, &mut two, &mut three]
        .into_iter()
        .filter_map(|inst| inst.controller.evaluate_scale_down().is_terminate().then_some(inst.id))
        .collect();
    assert_eq!(terminated, vec![one.id]);
}
