use crate::clock::Clock;
use crate::id::{statistic, IdPtr};
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

const NANOS_IN_SECONDS: f64 = 1e9;

/// Tracks tasks that are long relative to the reporting interval. Reports
/// the number of in-flight tasks and their accumulated duration in seconds.
pub struct LongTaskTimer {
    id: IdPtr,
    updated: LastUpdated,
    next: AtomicI64,
    // task id -> monotonic start time in nanos
    tasks: Mutex<HashMap<i64, i64>>,
}

impl LongTaskTimer {
    pub fn new(id: IdPtr, clock: Arc<dyn Clock>) -> Self {
        LongTaskTimer {
            id,
            updated: LastUpdated::new(clock),
            next: AtomicI64::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Begin tracking a task, returning its handle.
    pub fn start(&self) -> i64 {
        let task = self.next.fetch_add(1, Ordering::Relaxed);
        let now = self.updated.clock().monotonic_time();
        self.tasks
            .lock()
            .expect("task map is never poisoned")
            .insert(task, now);
        self.updated.touch();
        task
    }

    /// Elapsed nanos for a task, or -1 when the handle is unknown.
    pub fn duration(&self, task: i64) -> i64 {
        let now = self.updated.clock().monotonic_time();
        let tasks = self.tasks.lock().expect("task map is never poisoned");
        match tasks.get(&task) {
            Some(&start) => now - start,
            None => {
                tracing::info!(task, "unknown task id");
                -1
            }
        }
    }

    /// Stop tracking a task, returning its elapsed nanos or -1.
    pub fn stop(&self, task: i64) -> i64 {
        let elapsed = self.duration(task);
        if elapsed >= 0 {
            self.tasks
                .lock()
                .expect("task map is never poisoned")
                .remove(&task);
        }
        self.updated.touch();
        elapsed
    }

    /// Total elapsed nanos across all in-flight tasks.
    pub fn total_duration(&self) -> i64 {
        let now = self.updated.clock().monotonic_time();
        let tasks = self.tasks.lock().expect("task map is never poisoned");
        tasks.values().map(|&start| now - start).sum()
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .expect("task map is never poisoned")
            .len()
    }
}

impl Meter for LongTaskTimer {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        let now = self.updated.clock().wall_time();
        let duration_in_secs = self.total_duration() as f64 / NANOS_IN_SECONDS;
        vec![
            Measurement::new(
                self.id.with_tag(statistic::active_tasks()),
                now,
                self.active_tasks() as f64,
            ),
            Measurement::new(
                self.id.with_tag(statistic::duration()),
                now,
                duration_in_secs,
            ),
        ]
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "LongTaskTimer"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
