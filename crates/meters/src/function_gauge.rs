use crate::clock::Clock;
use crate::id::{statistic, with_default_gauge_tags, IdPtr};
use crate::measurement::Measurement;
use crate::meter::Meter;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A gauge that computes its value by applying a function to a target
/// object. The gauge holds the target weakly and expires when the target
/// is dropped, so registering one does not extend the target's lifetime.
pub struct FunctionGauge<T: Send + Sync + 'static> {
    id: IdPtr,
    clock: Arc<dyn Clock>,
    target: Weak<T>,
    f: Box<dyn Fn(&T) -> f64 + Send + Sync>,
    value: AtomicU64,
}

impl<T: Send + Sync + 'static> FunctionGauge<T> {
    pub fn new<F>(id: IdPtr, clock: Arc<dyn Clock>, target: &Arc<T>, f: F) -> Self
    where
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        FunctionGauge {
            id: with_default_gauge_tags(&id, statistic::gauge()),
            clock,
            target: Arc::downgrade(target),
            f: Box::new(f),
            value: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    /// Compute the current value, without caching it.
    pub fn value(&self) -> f64 {
        match self.target.upgrade() {
            Some(target) => (self.f)(&target),
            None => f64::NAN,
        }
    }
}

impl<T: Send + Sync + 'static> Meter for FunctionGauge<T> {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        let value = f64::from_bits(self.value.load(Ordering::Relaxed));
        vec![Measurement::new(
            self.id.clone(),
            self.clock.wall_time(),
            value,
        )]
    }

    fn has_expired(&self) -> bool {
        self.target.strong_count() == 0
    }

    fn is_updatable(&self) -> bool {
        true
    }

    fn update(&self) {
        self.value.store(self.value().to_bits(), Ordering::Relaxed);
    }

    fn kind(&self) -> &'static str {
        "FunctionGauge"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
