use crate::clock::Clock;
use crate::counter::{Counter, DoubleCounter};
use crate::dist_summary::{DistributionSummary, DoubleDistributionSummary};
use crate::gauge::{Gauge, MaxGauge};
use crate::id::{Id, IdPtr};
use crate::long_task_timer::LongTaskTimer;
use crate::measurement::Measurement;
use crate::meter::Meter;
use crate::tags::Tags;
use crate::timer::Timer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// De-duplicating store of meters by identity. Asking twice for the same
/// identity yields the same instance; meters idle past the expiration
/// window are dropped at the next measurement sweep.
pub struct Registry {
    clock: Arc<dyn Clock>,
    step_millis: i64,
    meters: Mutex<HashMap<IdPtr, Arc<dyn Meter>>>,
    meters_size: Arc<Gauge>,
}

impl Registry {
    pub fn new(step_millis: i64, clock: Arc<dyn Clock>) -> Arc<Registry> {
        let mut freq_tags = Tags::new();
        freq_tags.add_str("id", &format!("{:02}s", step_millis / 1000));
        let meters_size = Arc::new(Gauge::new(
            Id::new("atlas.numMeters", freq_tags),
            clock.clone(),
        ));

        let mut meters: HashMap<IdPtr, Arc<dyn Meter>> = HashMap::new();
        meters.insert(meters_size.id().clone(), meters_size.clone());

        Arc::new(Registry {
            clock,
            step_millis,
            meters: Mutex::new(meters),
            meters_size,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn step_millis(&self) -> i64 {
        self.step_millis
    }

    pub fn counter(&self, id: IdPtr) -> Arc<Counter<i64>> {
        self.get_or_insert(Arc::new(Counter::new(id, self.clock.clone(), self.step_millis)))
    }

    pub fn dcounter(&self, id: IdPtr) -> Arc<DoubleCounter> {
        self.get_or_insert(Arc::new(Counter::new(id, self.clock.clone(), self.step_millis)))
    }

    pub fn timer(&self, id: IdPtr) -> Arc<Timer> {
        self.get_or_insert(Arc::new(Timer::new(id, self.clock.clone(), self.step_millis)))
    }

    pub fn gauge(&self, id: IdPtr) -> Arc<Gauge> {
        self.get_or_insert(Arc::new(Gauge::new(id, self.clock.clone())))
    }

    pub fn max_gauge(&self, id: IdPtr) -> Arc<MaxGauge<f64>> {
        self.get_or_insert(Arc::new(MaxGauge::new(id, self.clock.clone(), self.step_millis)))
    }

    pub fn distribution_summary(&self, id: IdPtr) -> Arc<DistributionSummary<i64>> {
        self.get_or_insert(Arc::new(DistributionSummary::new(
            id,
            self.clock.clone(),
            self.step_millis,
        )))
    }

    pub fn ddistribution_summary(&self, id: IdPtr) -> Arc<DoubleDistributionSummary> {
        self.get_or_insert(Arc::new(DistributionSummary::new(
            id,
            self.clock.clone(),
            self.step_millis,
        )))
    }

    pub fn long_task_timer(&self, id: IdPtr) -> Arc<LongTaskTimer> {
        self.get_or_insert(Arc::new(LongTaskTimer::new(id, self.clock.clone())))
    }

    /// Register an externally constructed meter. If the identity is taken
    /// the existing meter is kept.
    pub fn register(&self, meter: Arc<dyn Meter>) {
        self.insert_if_absent(meter);
    }

    /// A point-in-time copy of the meter collection.
    pub fn meters(&self) -> Vec<Arc<dyn Meter>> {
        let meters = self.meters.lock().expect("meter map is never poisoned");
        meters.values().cloned().collect()
    }

    /// Samples from every live meter. Updatable meters are refreshed first;
    /// expired meters contribute nothing and are removed.
    pub fn measurements(&self) -> Vec<Measurement> {
        let all = self.meters();
        self.meters_size.update(all.len() as f64);

        // Timers and distribution summaries yield 4 samples, counters 1.
        let mut res = Vec::with_capacity(all.len() * 2);
        let mut expired = Vec::new();
        for meter in all {
            if meter.has_expired() {
                expired.push(meter.id().clone());
                continue;
            }
            if meter.is_updatable() {
                meter.update();
            }
            res.extend(meter.measure());
        }

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "removing expired meters");
            let mut meters = self.meters.lock().expect("meter map is never poisoned");
            for id in expired {
                meters.remove(&id);
            }
        }
        res
    }

    fn insert_if_absent(&self, meter: Arc<dyn Meter>) -> Arc<dyn Meter> {
        let mut meters = self.meters.lock().expect("meter map is never poisoned");
        meters
            .entry(meter.id().clone())
            .or_insert(meter)
            .clone()
    }

    fn get_or_insert<M: Meter + 'static>(&self, fresh: Arc<M>) -> Arc<M> {
        let stored = self.insert_if_absent(fresh.clone());
        if stored.kind() != fresh.kind() {
            tracing::error!(
                id = %stored.id(),
                existing = stored.kind(),
                requested = fresh.kind(),
                "identity is already registered as a different meter kind"
            );
            // Hand back the unregistered meter so the caller still has a
            // working instance; the stored meter is left alone.
            return fresh;
        }
        match stored.as_any().downcast::<M>() {
            Ok(meter) => meter,
            Err(_) => {
                tracing::error!(
                    id = %fresh.id(),
                    kind = fresh.kind(),
                    "identity is already registered with a different value type"
                );
                fresh
            }
        }
    }
}
