use crate::clock::Clock;
use crate::counter::Counter;
use crate::gauge::MaxGauge;
use crate::id::{statistic, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use crate::step::StepValue;
use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Tracks the distribution of recorded amounts. Like a timer, but for
/// unit-less values (bytes, queue depths, ...): no unit conversion is
/// applied. Four samples per interval: `count`, `totalAmount`,
/// `totalOfSquares` and `max`.
pub struct DistributionSummary<T: StepValue = i64> {
    id: IdPtr,
    updated: LastUpdated,
    count: AtomicI64,
    sub_count: Counter<i64>,
    sub_total_amount: Counter<T>,
    sub_total_sq: Counter<f64>,
    sub_max: MaxGauge<T>,
}

pub type DoubleDistributionSummary = DistributionSummary<f64>;

impl<T: StepValue> DistributionSummary<T> {
    pub fn new(id: IdPtr, clock: Arc<dyn Clock>, step_millis: i64) -> Self {
        DistributionSummary {
            sub_count: Counter::new(
                id.with_tag(statistic::count()),
                clock.clone(),
                step_millis,
            ),
            sub_total_amount: Counter::new(
                id.with_tag(statistic::total_amount()),
                clock.clone(),
                step_millis,
            ),
            sub_total_sq: Counter::new(
                id.with_tag(statistic::total_of_squares()),
                clock.clone(),
                step_millis,
            ),
            sub_max: MaxGauge::new(
                id.with_tag(statistic::max()),
                clock.clone(),
                step_millis,
            ),
            updated: LastUpdated::new(clock),
            count: AtomicI64::new(0),
            id,
        }
    }

    pub fn record(&self, amount: T) {
        if amount >= T::zero() {
            self.sub_count.increment();
            self.count.fetch_add(1, Ordering::Relaxed);
            self.sub_total_amount.add(amount);
            let amount_sq = amount.as_f64() * amount.as_f64();
            self.sub_total_sq.add(amount_sq);
            self.sub_max.update(amount);
        }
        self.updated.touch();
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total_amount(&self) -> T {
        self.sub_total_amount.count()
    }
}

impl<T: StepValue> Meter for DistributionSummary<T> {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        vec![
            self.sub_count.sample(),
            self.sub_total_amount.sample(),
            self.sub_total_sq.sample(),
            self.sub_max.sample(),
        ]
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "DistributionSummary"
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
    use interner::intern;

    fn value_for(ms: &[Measurement], stat: &str) -> f64 {
        ms.iter()
            .find(|m| m.id.tags().at(intern("statistic")) == Some(intern(stat)))
            .map(|m| m.value)
            .unwrap_or(f64::NAN)
    }

    #[test]
    fn four_samples_per_interval() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let summary: DistributionSummary<i64> =
            DistributionSummary::new(Id::new("d", Tags::new()), clock.clone(), 60_000);

        summary.record(100);
        summary.record(200);

        clock.set_wall(60_000);
        let ms = summary.measure();
        assert_eq!(ms.len(), 4);
        assert!((value_for(&ms, "count") - 2.0 / 60.0).abs() < 1e-9);
        assert!((value_for(&ms, "totalAmount") - 300.0 / 60.0).abs() < 1e-9);
        assert!((value_for(&ms, "totalOfSquares") - 50_000.0 / 60.0).abs() < 1e-9);
        assert!((value_for(&ms, "max") - 200.0).abs() < 1e-9);
    }

    #[test]
    fn negative_amounts_are_ignored() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let summary: DistributionSummary<i64> =
            DistributionSummary::new(Id::new("d", Tags::new()), clock.clone(), 60_000);

        summary.record(-5);
        assert_eq!(summary.count(), 0);
        assert_eq!(summary.total_amount(), 0);
    }
}
