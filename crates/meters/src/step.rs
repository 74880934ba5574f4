use crate::clock::Clock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Numeric types that can back a step-aggregated value. f64 has no native
/// atomic, so its operations are CAS loops over the bit pattern.
pub trait StepValue: Copy + PartialOrd + Send + Sync + 'static {
    type Atomic: Send + Sync;

    fn new_atomic(v: Self) -> Self::Atomic;
    fn load(a: &Self::Atomic) -> Self;
    fn store(a: &Self::Atomic, v: Self);
    fn swap(a: &Self::Atomic, v: Self) -> Self;
    fn add(a: &Self::Atomic, amount: Self);
    fn fetch_max(a: &Self::Atomic, v: Self);

    fn zero() -> Self;
    /// Smallest representable value, used as the init sentinel for max gauges.
    fn lowest() -> Self;
    fn as_f64(self) -> f64;
}

impl StepValue for i64 {
    type Atomic = AtomicI64;

    fn new_atomic(v: Self) -> Self::Atomic {
        AtomicI64::new(v)
    }
    fn load(a: &Self::Atomic) -> Self {
        a.load(Ordering::Relaxed)
    }
    fn store(a: &Self::Atomic, v: Self) {
        a.store(v, Ordering::Relaxed)
    }
    fn swap(a: &Self::Atomic, v: Self) -> Self {
        a.swap(v, Ordering::AcqRel)
    }
    fn add(a: &Self::Atomic, amount: Self) {
        a.fetch_add(amount, Ordering::Relaxed);
    }
    fn fetch_max(a: &Self::Atomic, v: Self) {
        let mut current = a.load(Ordering::Relaxed);
        while v > current {
            match a.compare_exchange_weak(current, v, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn zero() -> Self {
        0
    }
    fn lowest() -> Self {
        i64::MIN
    }
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl StepValue for f64 {
    type Atomic = AtomicU64;

    fn new_atomic(v: Self) -> Self::Atomic {
        AtomicU64::new(v.to_bits())
    }
    fn load(a: &Self::Atomic) -> Self {
        f64::from_bits(a.load(Ordering::Relaxed))
    }
    fn store(a: &Self::Atomic, v: Self) {
        a.store(v.to_bits(), Ordering::Relaxed)
    }
    fn swap(a: &Self::Atomic, v: Self) -> Self {
        f64::from_bits(a.swap(v.to_bits(), Ordering::AcqRel))
    }
    fn add(a: &Self::Atomic, amount: Self) {
        let mut current = a.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + amount).to_bits();
            match a.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
    fn fetch_max(a: &Self::Atomic, v: Self) {
        let mut current = a.load(Ordering::Relaxed);
        while v > f64::from_bits(current) {
            match a.compare_exchange_weak(
                current,
                v.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn zero() -> Self {
        0.0
    }
    fn lowest() -> Self {
        f64::MIN
    }
    fn as_f64(self) -> f64 {
        self
    }
}

/// An interval-aligned value. Writes accumulate into the bucket for the
/// in-progress step; at each step boundary the current bucket rolls into
/// the previous bucket and readers of `poll()` observe the value for the
/// most recently completed step.
pub struct StepNumber<T: StepValue> {
    init: T,
    step_millis: i64,
    clock: Arc<dyn Clock>,
    previous: T::Atomic,
    current: T::Atomic,
    last_init_pos: AtomicI64,
}

pub type StepLong = StepNumber<i64>;
pub type StepDouble = StepNumber<f64>;

impl<T: StepValue> StepNumber<T> {
    pub fn new(init: T, step_millis: i64, clock: Arc<dyn Clock>) -> Self {
        let pos = clock.wall_time() / step_millis;
        StepNumber {
            init,
            step_millis,
            clock,
            previous: T::new_atomic(init),
            current: T::new_atomic(init),
            last_init_pos: AtomicI64::new(pos),
        }
    }

    pub fn step_millis(&self) -> i64 {
        self.step_millis
    }

    /// Value for the last completed interval.
    pub fn poll(&self) -> T {
        self.roll();
        T::load(&self.previous)
    }

    /// Value accumulated so far in the current interval.
    pub fn current(&self) -> T {
        self.roll();
        T::load(&self.current)
    }

    pub fn add(&self, amount: T) {
        self.roll();
        T::add(&self.current, amount);
    }

    pub fn update_current_max(&self, v: T) {
        self.roll();
        T::fetch_max(&self.current, v);
    }

    fn roll(&self) {
        let now = self.clock.wall_time();
        let step_time = now / self.step_millis;
        let last_init = self.last_init_pos.load(Ordering::Acquire);

        // Only move forward; if the wall clock regresses we simply wait for
        // it to catch up. The compare-exchange makes the roll idempotent
        // under concurrent callers.
        if last_init < step_time
            && self
                .last_init_pos
                .compare_exchange(last_init, step_time, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let v = T::swap(&self.current, self.init);
            // If more than one boundary elapsed there was no activity in the
            // interval just completed, so it reads as the init value.
            let previous = if last_init == step_time - 1 {
                v
            } else {
                self.init
            };
            T::store(&self.previous, previous);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;

    fn step_long(clock: &Arc<ManualClock>) -> StepLong {
        StepNumber::new(0, 10_000, clock.clone() as Arc<dyn Clock>)
    }

    #[test]
    fn rolls_at_step_boundary() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let step = step_long(&clock);

        step.add(4);
        assert_eq!(step.current(), 4);
        assert_eq!(step.poll(), 0);

        clock.set_wall(10_000);
        assert_eq!(step.poll(), 4);
        assert_eq!(step.current(), 0);
    }

    #[test]
    fn missed_interval_reads_as_init() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let step = step_long(&clock);

        step.add(1);
        // Two boundaries pass with no reads: the skipped interval had no
        // activity so the previous value is absent, not 1.
        clock.set_wall(20_000);
        assert_eq!(step.poll(), 0);
    }

    #[test]
    fn clock_regression_does_not_roll_back() {
        let clock = Arc::new(ManualClock::new(10_000, 0));
        let step = step_long(&clock);

        step.add(3);
        clock.set_wall(20_000);
        assert_eq!(step.poll(), 3);

        clock.set_wall(5_000);
        assert_eq!(step.poll(), 3);
        step.add(2);

        // Time catches back up; the write landed in the current bucket.
        clock.set_wall(30_000);
        assert_eq!(step.poll(), 2);
    }

    #[test]
    fn double_accumulation() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let step: StepDouble = StepNumber::new(0.0, 10_000, clock.clone());

        step.add(0.5);
        step.add(0.25);
        clock.set_wall(10_000);
        assert!((step.poll() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn current_max() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let step: StepLong = StepNumber::new(i64::MIN, 10_000, clock.clone());

        step.update_current_max(4);
        step.update_current_max(2);
        step.update_current_max(9);
        clock.set_wall(10_000);
        assert_eq!(step.poll(), 9);

        // An untouched interval polls as the init sentinel.
        clock.set_wall(30_000);
        assert_eq!(step.poll(), i64::MIN);
    }
}
