use lazy_static::lazy_static;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Time sources used by meters: wall time in milliseconds since the epoch
/// for timestamps, and a monotonic reading in nanoseconds for durations.
pub trait Clock: Send + Sync {
    fn wall_time(&self) -> i64;
    fn monotonic_time(&self) -> i64;
}

lazy_static! {
    // Origin for the monotonic reading. The absolute value is meaningless;
    // only differences are.
    static ref MONOTONIC_ORIGIN: Instant = Instant::now();
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_time(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn monotonic_time(&self) -> i64 {
        MONOTONIC_ORIGIN.elapsed().as_nanos() as i64
    }
}

/// A clock that only moves when told to. Used to make interval arithmetic
/// deterministic in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    wall: AtomicI64,
    monotonic: AtomicI64,
}

impl ManualClock {
    pub fn new(wall_millis: i64, monotonic_nanos: i64) -> Self {
        ManualClock {
            wall: AtomicI64::new(wall_millis),
            monotonic: AtomicI64::new(monotonic_nanos),
        }
    }

    pub fn set_wall(&self, millis: i64) {
        self.wall.store(millis, Ordering::Relaxed);
    }

    pub fn set_monotonic(&self, nanos: i64) {
        self.monotonic.store(nanos, Ordering::Relaxed);
    }

    pub fn advance_wall(&self, millis: i64) {
        self.wall.fetch_add(millis, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn wall_time(&self) -> i64 {
        self.wall.load(Ordering::Relaxed)
    }

    fn monotonic_time(&self) -> i64 {
        self.monotonic.load(Ordering::Relaxed)
    }
}

/// Wraps another clock, adding an adjustable offset to the wall time.
/// The subscription manager uses this to advance to just before the next
/// step boundary and flush a final batch at shutdown.
pub struct OffsetClock {
    inner: Arc<dyn Clock>,
    offset_millis: AtomicI64,
}

impl OffsetClock {
    pub fn new(inner: Arc<dyn Clock>) -> Self {
        OffsetClock {
            inner,
            offset_millis: AtomicI64::new(0),
        }
    }

    pub fn set_offset(&self, millis: i64) {
        self.offset_millis.store(millis, Ordering::Relaxed);
    }
}

impl Clock for OffsetClock {
    fn wall_time(&self) -> i64 {
        self.inner.wall_time() + self.offset_millis.load(Ordering::Relaxed)
    }

    fn monotonic_time(&self) -> i64 {
        self.inner.monotonic_time()
    }
}
