use crate::clock::Clock;
use crate::id::IdPtr;
use crate::measurement::Measurement;
use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A meter that has seen no updates for this long is expired: its samples
/// are suppressed and the registry drops it at the next sweep.
pub const MAX_IDLE_MILLIS: i64 = 15 * 60 * 1000;

/// Common contract for all meter kinds. Meters are shared: asking the
/// registry twice for the same identity yields the same instance.
pub trait Meter: Send + Sync {
    fn id(&self) -> &IdPtr;

    /// Samples for the current reporting interval. May be empty.
    fn measure(&self) -> Vec<Measurement>;

    fn has_expired(&self) -> bool;

    /// Meters that derive their value from a callback are refreshed via
    /// `update` before being measured.
    fn is_updatable(&self) -> bool {
        false
    }

    fn update(&self) {}

    /// Concrete kind, used to detect identity collisions across kinds.
    fn kind(&self) -> &'static str;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Tracks the wall time of the most recent observation.
pub struct LastUpdated {
    clock: Arc<dyn Clock>,
    at: AtomicI64,
}

impl LastUpdated {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let updated = LastUpdated {
            clock,
            at: AtomicI64::new(0),
        };
        updated.touch();
        updated
    }

    pub fn touch(&self) {
        self.at
            .store(self.clock.wall_time(), Ordering::Relaxed);
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn has_expired(&self) -> bool {
        let last = self.at.load(Ordering::Relaxed);
        self.clock.wall_time() - last > MAX_IDLE_MILLIS
    }
}
