use crate::clock::Clock;
use crate::counter::Counter;
use crate::gauge::MaxGauge;
use crate::id::{statistic, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Recorded durations are in nanoseconds; published values are in seconds.
const NANOS_TO_SECONDS: f64 = 1.0 / 1e9;
const NANOS_SQ_TO_SECONDS_SQ: f64 = NANOS_TO_SECONDS * NANOS_TO_SECONDS;

/// A timer tracks how often an event happens and how long it takes.
/// Each interval yields four samples distinguished by the `statistic` tag:
/// `count` (rate/s), `totalTime` (s), `totalOfSquares` (s²) and `max` (s).
pub struct Timer {
    id: IdPtr,
    updated: LastUpdated,
    count: AtomicI64,
    total_time: AtomicI64,
    sub_count: Counter<i64>,
    sub_total_time: Counter<i64>,
    sub_total_sq: Counter<f64>,
    sub_max: MaxGauge<i64>,
}

impl Timer {
    pub fn new(id: IdPtr, clock: Arc<dyn Clock>, step_millis: i64) -> Self {
        Timer {
            sub_count: Counter::new(
                id.with_tag(statistic::count()),
                clock.clone(),
                step_millis,
            ),
            sub_total_time: Counter::new(
                id.with_tag(statistic::total_time()),
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
            total_time: AtomicI64::new(0),
            id,
        }
    }

    pub fn record(&self, duration: Duration) {
        let nanos = duration.as_nanos() as i64;
        self.record_nanos(nanos);
    }

    pub fn record_nanos(&self, nanos: i64) {
        if nanos < 0 {
            return;
        }
        self.sub_count.increment();
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_time.fetch_add(nanos, Ordering::Relaxed);
        self.sub_total_time.add(nanos);
        let nanos_sq = nanos as f64 * nanos as f64;
        self.sub_total_sq.add(nanos_sq);
        self.sub_max.update(nanos);
        self.updated.touch();
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Total recorded time in nanoseconds, across all intervals.
    pub fn total_time(&self) -> i64 {
        self.total_time.load(Ordering::Relaxed)
    }
}

impl Meter for Timer {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        vec![
            self.sub_count.sample(),
            self.sub_total_time.sample().scaled(NANOS_TO_SECONDS),
            self.sub_total_sq.sample().scaled(NANOS_SQ_TO_SECONDS_SQ),
            self.sub_max.sample().scaled(NANOS_TO_SECONDS),
        ]
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "Timer"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
