use crate::clock::Clock;
use crate::id::{statistic, with_default_gauge_tags, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use crate::step::{StepNumber, StepValue};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A gauge reports the last value it was set to.
pub struct Gauge {
    id: IdPtr,
    updated: LastUpdated,
    value: AtomicU64,
}

impl Gauge {
    pub fn new(id: IdPtr, clock: Arc<dyn Clock>) -> Self {
        Gauge {
            id: with_default_gauge_tags(&id, statistic::gauge()),
            updated: LastUpdated::new(clock),
            value: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    pub fn update(&self, v: f64) {
        self.value.store(v.to_bits(), Ordering::Relaxed);
        self.updated.touch();
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

impl Meter for Gauge {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        let now = self.updated.clock().wall_time();
        vec![Measurement::new(self.id.clone(), now, self.value())]
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "Gauge"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A max gauge reports the maximum value observed during the last completed
/// step, or NaN for an interval with no updates.
pub struct MaxGauge<T: StepValue = f64> {
    id: IdPtr,
    updated: LastUpdated,
    step: StepNumber<T>,
    local_max: T::Atomic,
}

impl<T: StepValue> MaxGauge<T> {
    pub fn new(id: IdPtr, clock: Arc<dyn Clock>, step_millis: i64) -> Self {
        MaxGauge {
            id: with_default_gauge_tags(&id, statistic::max()),
            updated: LastUpdated::new(clock.clone()),
            step: StepNumber::new(T::lowest(), step_millis, clock),
            local_max: T::new_atomic(T::lowest()),
        }
    }

    pub fn update(&self, v: T) {
        self.step.update_current_max(v);
        T::fetch_max(&self.local_max, v);
        self.updated.touch();
    }

    /// Maximum seen since creation, across all intervals.
    pub fn value(&self) -> f64 {
        let v = T::load(&self.local_max);
        if v == T::lowest() {
            f64::NAN
        } else {
            v.as_f64()
        }
    }

    pub(crate) fn sample(&self) -> Measurement {
        let polled = self.step.poll();
        // The init sentinel means the interval saw no updates; publish it
        // as an absent value rather than the numeric lowest.
        let max = if polled == T::lowest() {
            f64::NAN
        } else {
            polled.as_f64()
        };

        let step_millis = self.step.step_millis();
        let now = self.updated.clock().wall_time();
        let start_step = now - now % step_millis;
        Measurement::new(self.id.clone(), start_step, max)
    }
}

impl<T: StepValue> Meter for MaxGauge<T> {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        vec![self.sample()]
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "MaxGauge"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
