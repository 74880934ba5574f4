use crate::counter::Counter;
use crate::id::{statistic, with_default_tag, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use crate::registry::Registry;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Tracks an externally maintained, monotonically increasing value (e.g. a
/// kernel counter) and reports its rate of change by feeding deltas into a
/// registry counter. The first observation only establishes the baseline.
pub struct MonotonicCounter {
    id: IdPtr,
    updated: LastUpdated,
    registry: Weak<Registry>,
    value: AtomicI64,
    primed: AtomicBool,
    counter: Mutex<Option<Arc<Counter<i64>>>>,
}

impl MonotonicCounter {
    pub fn new(registry: &Arc<Registry>, id: IdPtr) -> Self {
        MonotonicCounter {
            id: with_default_tag(&id, statistic::count()),
            updated: LastUpdated::new(registry.clock().clone()),
            registry: Arc::downgrade(registry),
            value: AtomicI64::new(0),
            primed: AtomicBool::new(false),
            counter: Mutex::new(None),
        }
    }

    /// Observe the current value of the external counter.
    pub fn set(&self, amount: i64) {
        if self.primed.load(Ordering::Relaxed) {
            let prev = self.value.load(Ordering::Relaxed);
            let delta = amount - prev;
            // A negative delta means the source was reset; skip it and let
            // the new value become the baseline.
            if delta >= 0 {
                if let Some(counter) = self.counter() {
                    counter.add(delta);
                }
            }
        }
        self.value.store(amount, Ordering::Relaxed);
        self.primed.store(true, Ordering::Relaxed);
        self.updated.touch();
    }

    pub fn count(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn counter(&self) -> Option<Arc<Counter<i64>>> {
        let mut counter = self.counter.lock().expect("counter cell is never poisoned");
        if counter.is_none() {
            *counter = self
                .registry
                .upgrade()
                .map(|registry| registry.counter(self.id.clone()));
        }
        counter.clone()
    }
}

impl Meter for MonotonicCounter {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    // The registered counter carries the samples.
    fn measure(&self) -> Vec<Measurement> {
        Vec::new()
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "MonotonicCounter"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::id::Id;
    use crate::tags::Tags;

    fn rate_of(registry: &Registry, name: &str) -> f64 {
        registry
            .measurements()
            .iter()
            .find(|m| m.id.name() == interner::intern(name))
            .map(|m| m.value)
            .unwrap_or(f64::NAN)
    }

    #[test]
    fn first_set_is_baseline_only() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let registry = Registry::new(60_000, clock.clone());
        let counter = MonotonicCounter::new(&registry, Id::new("mono", Tags::new()));

        counter.set(100);
        counter.set(160);
        assert_eq!(counter.count(), 160);

        clock.set_wall(60_000);
        assert!((rate_of(&registry, "mono") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn negative_delta_resets_baseline() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let registry = Registry::new(60_000, clock.clone());
        let counter = MonotonicCounter::new(&registry, Id::new("mono", Tags::new()));

        counter.set(100);
        counter.set(40); // source reset
        counter.set(100);

        clock.set_wall(60_000);
        assert!((rate_of(&registry, "mono") - 1.0).abs() < 1e-9);
    }
}
