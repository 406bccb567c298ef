//! Local occupancy state of this instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use warmpool_core::{Clock, OccupancyProbe, SystemClock};

struct Inner {
    occupied: AtomicBool,
    /// Last transition to idle. Construction counts as one.
    idle_since: Mutex<Instant>,
}

/// Shared handle to this instance's occupancy.
///
/// The connection handler flips it; the controller reads it through
/// [`OccupancyProbe`]. One connection at a time.
#[derive(Clone)]
pub struct OccupancyTracker {
    inner: Arc<Inner>,
    clock: Arc<dyn Clock>,
}

impl OccupancyTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                occupied: AtomicBool::new(false),
                idle_since: Mutex::new(clock.now()),
            }),
            clock,
        }
    }

    /// Mark the instance occupied. Returns false if it already was.
    pub fn begin_session(&self) -> bool {
        self.inner
            .occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the instance idle and restart the idle clock.
    pub fn end_session(&self) {
        let mut idle_since = self
            .inner
            .idle_since
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *idle_since = self.clock.now();
        self.inner.occupied.store(false, Ordering::Release);
    }
}

impl Default for OccupancyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OccupancyProbe for OccupancyTracker {
    fn is_occupied(&self) -> bool {
        self.inner.occupied.load(Ordering::Acquire)
    }

    fn idle_duration(&self) -> Duration {
        if self.is_occupied() {
            return Duration::ZERO;
        }
        let idle_since = *self
            .inner
            .idle_since
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        self.clock.now().saturating_duration_since(idle_since)
    }
}
