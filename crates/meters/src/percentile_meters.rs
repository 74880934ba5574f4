use crate::counter::Counter;
use crate::dist_summary::DistributionSummary;
use crate::id::{statistic, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use crate::percentile_buckets::{self, LENGTH};
use crate::registry::Registry;
use crate::tags::Tag;
use crate::timer::Timer;
use interner::intern;
use std::any::Any;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

// Per-bucket counters are created on first use; most of the 276 buckets
// are never touched.
struct BucketCounters {
    prefix: char,
    counters: Mutex<Vec<Option<Arc<Counter<i64>>>>>,
}

impl BucketCounters {
    fn new(prefix: char) -> Self {
        BucketCounters {
            prefix,
            counters: Mutex::new(vec![None; LENGTH]),
        }
    }

    fn counter_for(
        &self,
        registry: &Weak<Registry>,
        id: &IdPtr,
        i: usize,
    ) -> Option<Arc<Counter<i64>>> {
        let mut counters = self.counters.lock().expect("counter table is never poisoned");
        if counters[i].is_none() {
            let registry = registry.upgrade()?;
            let tag = Tag::of(
                intern("percentile"),
                intern(&format!("{}{:04X}", self.prefix, i)),
            );
            let bucket_id = id.with_tag(statistic::percentile()).with_tag(tag);
            counters[i] = Some(registry.counter(bucket_id));
        }
        counters[i].clone()
    }

    fn counts(&self, registry: &Weak<Registry>, id: &IdPtr) -> [i64; LENGTH] {
        let mut counts = [0i64; LENGTH];
        for (i, count) in counts.iter_mut().enumerate() {
            if let Some(counter) = self.counter_for(registry, id, i) {
                *count = counter.count();
            }
        }
        counts
    }
}

/// A timer that additionally maintains per-bucket counters so percentiles
/// can be estimated server-side from counts alone.
pub struct PercentileTimer {
    id: IdPtr,
    updated: LastUpdated,
    registry: Weak<Registry>,
    timer: Arc<Timer>,
    buckets: BucketCounters,
}

impl PercentileTimer {
    pub fn new(registry: &Arc<Registry>, id: IdPtr) -> Self {
        PercentileTimer {
            updated: LastUpdated::new(registry.clock().clone()),
            registry: Arc::downgrade(registry),
            timer: registry.timer(id.clone()),
            buckets: BucketCounters::new('T'),
            id,
        }
    }

    pub fn record(&self, duration: Duration) {
        self.timer.record(duration);
        let nanos = duration.as_nanos() as i64;
        let i = percentile_buckets::index_of(nanos);
        if let Some(counter) = self.buckets.counter_for(&self.registry, &self.id, i) {
            counter.increment();
        }
        self.updated.touch();
    }

    /// Estimated percentile in seconds.
    pub fn percentile(&self, p: f64) -> f64 {
        let counts = self.buckets.counts(&self.registry, &self.id);
        percentile_buckets::percentile(&counts, p) / 1e9
    }

    pub fn count(&self) -> i64 {
        self.timer.count()
    }
}

impl Meter for PercentileTimer {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    // The delegate timer and bucket counters carry the samples.
    fn measure(&self) -> Vec<Measurement> {
        Vec::new()
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "PercentileTimer"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A distribution summary with per-bucket percentile counters.
pub struct PercentileDistributionSummary {
    id: IdPtr,
    updated: LastUpdated,
    registry: Weak<Registry>,
    summary: Arc<DistributionSummary<i64>>,
    buckets: BucketCounters,
}

impl PercentileDistributionSummary {
    pub fn new(registry: &Arc<Registry>, id: IdPtr) -> Self {
        PercentileDistributionSummary {
            updated: LastUpdated::new(registry.clock().clone()),
            registry: Arc::downgrade(registry),
            summary: registry.distribution_summary(id.clone()),
            buckets: BucketCounters::new('D'),
            id,
        }
    }

    pub fn record(&self, amount: i64) {
        self.summary.record(amount);
        let i = percentile_buckets::index_of(amount);
        if let Some(counter) = self.buckets.counter_for(&self.registry, &self.id, i) {
            counter.increment();
        }
        self.updated.touch();
    }

    /// Estimated percentile in the recorded unit.
    pub fn percentile(&self, p: f64) -> f64 {
        let counts = self.buckets.counts(&self.registry, &self.id);
        percentile_buckets::percentile(&counts, p)
    }

    pub fn count(&self) -> i64 {
        self.summary.count()
    }
}

impl Meter for PercentileDistributionSummary {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        Vec::new()
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "PercentileDistributionSummary"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
