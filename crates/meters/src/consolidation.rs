use crate::id::IdPtr;
use crate::measurement::Measurement;
use interner::{intern, Symbol};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggrOp {
    Add,
    Max,
}

lazy_static! {
    static ref STATISTIC: Symbol = intern("statistic");
    static ref ADD_STATISTICS: Vec<Symbol> = [
        "count",
        "totalAmount",
        "totalTime",
        "totalOfSquares",
        "percentile",
    ]
    .iter()
    .map(|s| intern(s))
    .collect();
}

fn op_for(id: &IdPtr) -> AggrOp {
    match id.tags().at(*STATISTIC) {
        Some(stat) if ADD_STATISTICS.contains(&stat) => AggrOp::Add,
        _ => AggrOp::Max,
    }
}

struct ConsolidatedValue {
    op: AggrOp,
    // Add inputs are rates per second, so each fast-interval contribution
    // is scaled down by the number of fast steps per slow step.
    update_multiple: i64,
    value: f64,
    has_value: bool,
    marked: bool,
}

impl ConsolidatedValue {
    fn new(op: AggrOp, update_multiple: i64) -> Self {
        ConsolidatedValue {
            op,
            update_multiple,
            value: 0.0,
            has_value: false,
            marked: false,
        }
    }

    fn update(&mut self, v: f64) {
        match self.op {
            AggrOp::Add => {
                let contribution = v / self.update_multiple as f64;
                if self.has_value {
                    self.value += contribution;
                } else {
                    self.value = contribution;
                }
            }
            AggrOp::Max => {
                if self.has_value {
                    self.value = self.value.max(v);
                } else {
                    self.value = v;
                }
            }
        }
        self.has_value = true;
    }
}

/// Folds measurements sampled every `update_frequency` millis into one
/// measurement per `reporting_frequency` millis for each identity. Counter
/// statistics accumulate; everything else takes the max.
pub struct ConsolidationRegistry {
    update_multiple: i64,
    values: Mutex<HashMap<IdPtr, ConsolidatedValue>>,
}

impl ConsolidationRegistry {
    pub fn new(update_frequency: i64, reporting_frequency: i64) -> Self {
        assert!(reporting_frequency % update_frequency == 0);
        assert!(update_frequency % 1000 == 0);
        ConsolidationRegistry {
            update_multiple: reporting_frequency / update_frequency,
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Fold a batch of fast-cadence samples into the running values.
    pub fn update_from(&self, measurements: &[Measurement]) {
        let mut values = self.values.lock().expect("value map is never poisoned");

        for m in measurements {
            if m.value.is_nan() {
                continue;
            }
            let entry = values
                .entry(m.id.clone())
                .or_insert_with(|| ConsolidatedValue::new(op_for(&m.id), self.update_multiple));
            entry.update(m.value);
        }
    }

    /// Snapshot the slow-cadence samples. Entries that saw no contribution
    /// since the previous snapshot are marked; entries already marked are
    /// removed (two silent intervals).
    pub fn measurements(&self, timestamp: i64) -> Vec<Measurement> {
        let mut values = self.values.lock().expect("value map is never poisoned");

        let mut result = Vec::with_capacity(values.len());
        let mut to_remove = Vec::new();
        for (id, v) in values.iter_mut() {
            if v.has_value {
                v.has_value = false;
                v.marked = false;
                result.push(Measurement::new(id.clone(), timestamp, v.value));
            } else if v.marked {
                to_remove.push(id.clone());
            } else {
                v.marked = true;
            }
        }

        tracing::debug!(
            returned = result.len(),
            expired = to_remove.len(),
            "consolidation snapshot"
        );
        for id in to_remove {
            values.remove(&id);
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::Id;
    use crate::tags::Tags;

    fn registry() -> ConsolidationRegistry {
        ConsolidationRegistry::new(5_000, 60_000)
    }

    fn single(id: &IdPtr, value: f64) -> Vec<Measurement> {
        vec![Measurement::new(id.clone(), 0, value)]
    }

    #[test]
    fn add_statistic_consolidates_rates() {
        let registry = registry();
        let id = Id::new("m", vec![("statistic", "count")].into());

        // Twelve 5s samples at a rate of 1/5 events per second fold into a
        // 60s sample at 12/60.
        for _ in 0..12 {
            registry.update_from(&single(&id, 1.0 / 5.0));
        }
        let ms = registry.measurements(60_000);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms[0].timestamp, 60_000);
        assert!((ms[0].value - 12.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn gauge_statistic_takes_max() {
        let registry = registry();
        let id = Id::new("m", vec![("statistic", "max")].into());

        registry.update_from(&single(&id, 2.0));
        registry.update_from(&single(&id, 9.0));
        registry.update_from(&single(&id, 4.0));

        let ms = registry.measurements(60_000);
        assert_eq!(ms.len(), 1);
        assert!((ms[0].value - 9.0).abs() < 1e-9);
    }

    #[test]
    fn nan_values_are_skipped() {
        let registry = registry();
        let id = Id::new("m", vec![("statistic", "count")].into());

        registry.update_from(&single(&id, f64::NAN));
        assert!(registry.measurements(60_000).is_empty());
    }

    #[test]
    fn two_strike_expiration() {
        let registry = registry();
        let id = Id::new("m", vec![("statistic", "count")].into());

        registry.update_from(&single(&id, 1.0));
        assert_eq!(registry.measurements(60_000).len(), 1);

        // First silent interval: marked, still present.
        assert!(registry.measurements(120_000).is_empty());
        // Second silent interval: removed.
        assert!(registry.measurements(180_000).is_empty());

        // A new observation recreates the entry from scratch.
        registry.update_from(&single(&id, 12.0));
        let ms = registry.measurements(240_000);
        assert_eq!(ms.len(), 1);
        assert!((ms[0].value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn activity_clears_the_mark() {
        let registry = registry();
        let id = Id::new("m", vec![("statistic", "max")].into());

        registry.update_from(&single(&id, 1.0));
        assert_eq!(registry.measurements(60_000).len(), 1);
        assert!(registry.measurements(120_000).is_empty()); // marked

        registry.update_from(&single(&id, 2.0));
        assert_eq!(registry.measurements(180_000).len(), 1);
        // The mark was cleared by the activity; expiration restarts.
        assert!(registry.measurements(240_000).is_empty());
        assert!(registry.measurements(300_000).is_empty());
    }
}
