use crate::counter::Counter;
use crate::function_gauge::FunctionGauge;
use crate::id::{statistic, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use crate::registry::Registry;
use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A counter that also publishes how long ago it was last incremented, as a
/// `statistic=duration` gauge in seconds. Useful for detecting stalled
/// periodic work.
pub struct IntervalCounter {
    id: IdPtr,
    updated: LastUpdated,
    counter: Arc<Counter<i64>>,
    last_update: Arc<AtomicI64>,
}

impl IntervalCounter {
    pub fn new(registry: &Arc<Registry>, id: IdPtr) -> Self {
        let clock = registry.clock().clone();
        let counter = registry.counter(id.with_tag(statistic::count()));

        // The age gauge reads the epoch-millis of the last update through a
        // clock-aware callback, and expires together with this meter.
        let last_update = Arc::new(AtomicI64::new(0));
        let gauge_clock = clock.clone();
        let gauge = Arc::new(FunctionGauge::new(
            id.with_tag(statistic::duration()),
            clock.clone(),
            &last_update,
            move |cell| {
                (gauge_clock.wall_time() - cell.load(Ordering::Relaxed)) as f64 / 1000.0
            },
        ));
        registry.register(gauge);

        IntervalCounter {
            id,
            updated: LastUpdated::new(clock),
            counter,
            last_update,
        }
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, amount: i64) {
        self.counter.add(amount);
        self.last_update
            .store(self.updated.clock().wall_time(), Ordering::Relaxed);
        self.updated.touch();
    }

    pub fn count(&self) -> i64 {
        self.counter.count()
    }

    pub fn seconds_since_last_update(&self) -> f64 {
        let last = self.last_update.load(Ordering::Relaxed);
        (self.updated.clock().wall_time() - last) as f64 / 1000.0
    }
}

impl Meter for IntervalCounter {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    // The registered counter and age gauge carry the samples.
    fn measure(&self) -> Vec<Measurement> {
        Vec::new()
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "IntervalCounter"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
