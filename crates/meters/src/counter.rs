use crate::clock::Clock;
use crate::id::{statistic, with_default_tag, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use crate::step::{StepNumber, StepValue};
use std::any::Any;
use std::sync::Arc;

/// A counter reports the rate per second of its increments over the last
/// completed step. One sample per interval, tagged `statistic=count`.
pub struct Counter<T: StepValue = i64> {
    id: IdPtr,
    updated: LastUpdated,
    step: StepNumber<T>,
    total: T::Atomic,
}

pub type DoubleCounter = Counter<f64>;

impl<T: StepValue> Counter<T> {
    pub fn new(id: IdPtr, clock: Arc<dyn Clock>, step_millis: i64) -> Self {
        Counter {
            id: with_default_tag(&id, statistic::count()),
            updated: LastUpdated::new(clock.clone()),
            step: StepNumber::new(T::zero(), step_millis, clock),
            total: T::new_atomic(T::zero()),
        }
    }

    pub fn add(&self, amount: T) {
        self.step.add(amount);
        T::add(&self.total, amount);
        self.updated.touch();
    }

    /// Total accumulated since creation, across all intervals.
    pub fn count(&self) -> T {
        T::load(&self.total)
    }

    pub(crate) fn sample(&self) -> Measurement {
        let step_millis = self.step.step_millis();
        let per_second = step_millis as f64 / 1000.0;
        let rate = self.step.poll().as_f64() / per_second;

        let now = self.updated.clock().wall_time();
        let start_step = now - now % step_millis;
        Measurement::new(self.id.clone(), start_step, rate)
    }
}

impl Counter<i64> {
    pub fn increment(&self) {
        self.add(1);
    }
}

impl<T: StepValue> Meter for Counter<T> {
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
        "Counter"
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

    fn counter_at(clock: &Arc<ManualClock>) -> Counter<i64> {
        let id = Id::new("m1", vec![("k1", "v1"), ("k2", "v2")].into());
        Counter::new(id, clock.clone(), 60_000)
    }

    #[test]
    fn reports_rate_per_second() {
        let clock = Arc::new(ManualClock::new(42, 0));
        let counter = counter_at(&clock);
        counter.increment();

        clock.set_wall(60_042);
        let ms = counter.measure();
        assert_eq!(ms.len(), 1);
        assert_eq!(ms[0].timestamp, 60_000);
        assert!((ms[0].value - 1.0 / 60.0).abs() < 1e-9);
        assert_eq!(
            ms[0].id.tags().at(interner::intern("statistic")),
            Some(interner::intern("count"))
        );
    }

    #[test]
    fn total_count_spans_intervals() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let counter = counter_at(&clock);

        counter.add(3);
        clock.set_wall(60_000);
        counter.add(2);
        assert_eq!(counter.count(), 5);
    }

    #[test]
    fn double_counter_accumulates() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let id = Id::new("m1", Tags::new());
        let counter: DoubleCounter = Counter::new(id, clock.clone(), 60_000);

        counter.add(0.5);
        counter.add(0.25);
        clock.set_wall(60_000);
        let ms = counter.measure();
        assert!((ms[0].value - 0.75 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn expires_when_idle() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let counter = counter_at(&clock);
        assert!(!counter.has_expired());

        clock.set_wall(15 * 60 * 1000 + 1);
        assert!(counter.has_expired());

        counter.increment();
        assert!(!counter.has_expired());
    }
}
