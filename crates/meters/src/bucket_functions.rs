use interner::{intern, Symbol};
use lazy_static::lazy_static;
use std::sync::Arc;
use std::time::Duration;

/// Maps an amount to the label of the histogram bucket it falls in.
pub type BucketFunction = Arc<dyn Fn(i64) -> Symbol + Send + Sync>;

#[derive(Clone, Copy)]
struct Bucket {
    label: Symbol,
    upper_boundary: i64,
}

fn buckets_function(buckets: Vec<Bucket>, fallback: Symbol) -> BucketFunction {
    Arc::new(move |amount| {
        for b in &buckets {
            if amount <= b.upper_boundary {
                return b.label;
            }
        }
        fallback
    })
}

/// Formats a value as a fixed-width bucket label, e.g. `030s` or `2_KiB`.
#[derive(Clone)]
struct ValueFormatter {
    max: i64,
    width: usize,
    suffix: &'static str,
    factor: i64,
}

impl ValueFormatter {
    fn label(&self, v: i64) -> Symbol {
        let unit = v / self.factor;
        intern(&format!(
            "{:0width$}{}",
            unit,
            self.suffix,
            width = self.width
        ))
    }

    fn bucket(&self, v: i64) -> Bucket {
        Bucket {
            label: self.label(v),
            upper_boundary: v,
        }
    }
}

const NANOS: i64 = 1;
const MICROS: i64 = 1_000;
const MILLIS: i64 = 1_000 * MICROS;
const SECS: i64 = 1_000 * MILLIS;
const MINS: i64 = 60 * SECS;
const HOURS: i64 = 60 * MINS;

fn time_fmt(max_nanos: i64, width: usize, suffix: &'static str, factor: i64) -> ValueFormatter {
    ValueFormatter {
        max: max_nanos,
        width,
        suffix,
        factor,
    }
}

lazy_static! {
    static ref TIME_FORMATTERS: Vec<ValueFormatter> = vec![
        time_fmt(10, 1, "ns", NANOS),
        time_fmt(100, 2, "ns", NANOS),
        time_fmt(MICROS, 3, "ns", NANOS),
        time_fmt(8 * MICROS, 4, "ns", NANOS),
        time_fmt(10 * MICROS, 1, "us", MICROS),
        time_fmt(100 * MICROS, 2, "us", MICROS),
        time_fmt(MILLIS, 3, "us", MICROS),
        time_fmt(8 * MILLIS, 4, "us", MICROS),
        time_fmt(10 * MILLIS, 1, "ms", MILLIS),
        time_fmt(100 * MILLIS, 2, "ms", MILLIS),
        time_fmt(SECS, 3, "ms", MILLIS),
        time_fmt(8 * SECS, 4, "ms", MILLIS),
        time_fmt(10 * SECS, 1, "s", SECS),
        time_fmt(100 * SECS, 2, "s", SECS),
        time_fmt(8 * MINS, 3, "s", SECS),
        time_fmt(10 * MINS, 1, "min", MINS),
        time_fmt(100 * MINS, 2, "min", MINS),
        time_fmt(8 * HOURS, 3, "min", MINS),
        time_fmt(10 * HOURS, 1, "h", HOURS),
        time_fmt(100 * HOURS, 2, "h", HOURS),
        time_fmt(24 * 8 * HOURS, 3, "h", HOURS),
        time_fmt(i64::MAX, 6, "h", HOURS),
    ];
    static ref BINARY_FORMATTERS: Vec<ValueFormatter> = init_binary_formatters();
    static ref DECIMAL_FORMATTERS: Vec<ValueFormatter> = init_decimal_formatters();
}

fn bin(max: i64, pow: u32, width: usize, suffix: &'static str) -> ValueFormatter {
    let shift = pow * 10;
    ValueFormatter {
        max: if shift == 0 { max } else { max << shift },
        width,
        suffix,
        factor: 1i64 << shift,
    }
}

fn init_binary_formatters() -> Vec<ValueFormatter> {
    let units = ["_B", "_KiB", "_MiB", "_GiB", "_TiB", "_PiB"];
    let mut v = Vec::new();
    for (i, unit) in units.iter().enumerate() {
        let pow = i as u32;
        v.push(bin(10, pow, 1, unit));
        v.push(bin(100, pow, 2, unit));
        v.push(bin(1_000, pow, 3, unit));
        v.push(bin(10_000, pow, 4, unit));
    }
    v.push(ValueFormatter {
        max: i64::MAX,
        width: 4,
        suffix: "_PiB",
        factor: 1i64 << 50,
    });
    v
}

fn pow10(b: u32) -> i64 {
    (0..b).fold(1i64, |acc, _| acc * 10)
}

fn dec(max: i64, pow: u32, width: usize, suffix: &'static str) -> ValueFormatter {
    let factor = pow10(pow);
    ValueFormatter {
        max: max * factor,
        width,
        suffix,
        factor,
    }
}

fn init_decimal_formatters() -> Vec<ValueFormatter> {
    let units = ["", "_k", "_M", "_G", "_T", "_P"];
    let mut v = Vec::new();
    for (i, unit) in units.iter().enumerate() {
        let pow = i as u32 * 3;
        v.push(dec(10, pow, 1, unit));
        v.push(dec(100, pow, 2, unit));
        v.push(dec(1_000, pow, 3, unit));
    }
    v.push(ValueFormatter {
        max: i64::MAX,
        width: 1,
        suffix: "_E",
        factor: pow10(18),
    });
    v
}

fn formatter_for(formatters: &[ValueFormatter], max: i64) -> &ValueFormatter {
    formatters
        .iter()
        .find(|vf| max < vf.max)
        .unwrap_or_else(|| &formatters[formatters.len() - 1])
}

fn bias_zero(lt_zero: &str, gt_max: &str, max: i64, vf: &ValueFormatter) -> BucketFunction {
    let buckets = vec![
        Bucket {
            label: intern(lt_zero),
            upper_boundary: -1,
        },
        vf.bucket(max / 8),
        vf.bucket(max / 4),
        vf.bucket(max / 2),
        vf.bucket(max),
    ];
    buckets_function(buckets, intern(gt_max))
}

fn bias_max(lt_zero: &str, gt_max: &str, max: i64, vf: &ValueFormatter) -> BucketFunction {
    let buckets = vec![
        Bucket {
            label: intern(lt_zero),
            upper_boundary: -1,
        },
        vf.bucket(max - max / 2),
        vf.bucket(max - max / 4),
        vf.bucket(max - max / 8),
        vf.bucket(max),
    ];
    buckets_function(buckets, intern(gt_max))
}

fn time_bias_zero(lt_zero: &str, gt_max: &str, duration: Duration) -> BucketFunction {
    let v = duration.as_nanos() as i64;
    bias_zero(lt_zero, gt_max, v, formatter_for(&TIME_FORMATTERS, v))
}

fn time_bias_max(lt_zero: &str, gt_max: &str, duration: Duration) -> BucketFunction {
    let v = duration.as_nanos() as i64;
    bias_max(lt_zero, gt_max, v, formatter_for(&TIME_FORMATTERS, v))
}

/// Buckets for an age measured in nanos, biased towards recent values.
pub fn age(duration: Duration) -> BucketFunction {
    time_bias_zero("future", "old", duration)
}

/// Buckets for an age measured in nanos, biased towards the maximum.
pub fn age_bias_old(duration: Duration) -> BucketFunction {
    time_bias_max("future", "old", duration)
}

/// Buckets for a latency measured in nanos, biased towards fast values.
pub fn latency(duration: Duration) -> BucketFunction {
    time_bias_zero("negative_latency", "slow", duration)
}

/// Buckets for a latency measured in nanos, biased towards the maximum.
pub fn latency_bias_slow(duration: Duration) -> BucketFunction {
    time_bias_max("negative_latency", "slow", duration)
}

/// Buckets for a size in bytes with binary unit labels.
pub fn bytes(max: i64) -> BucketFunction {
    bias_zero(
        "negative",
        "large",
        max,
        formatter_for(&BINARY_FORMATTERS, max),
    )
}

/// Buckets for a count with decimal unit labels.
pub fn decimal(max: i64) -> BucketFunction {
    bias_zero(
        "negative",
        "large",
        max,
        formatter_for(&DECIMAL_FORMATTERS, max),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn secs(n: u64) -> i64 {
        Duration::from_secs(n).as_nanos() as i64
    }

    #[test]
    fn age_boundaries() {
        let f = age(Duration::from_secs(60));
        assert_eq!(f(-1).as_str(), "future");
        assert_eq!(f(secs(61)).as_str(), "old");
        assert_eq!(f(secs(30)).as_str(), "30s");
        assert_eq!(f(secs(10)).as_str(), "15s");
        assert_eq!(f(secs(60)).as_str(), "60s");
    }

    #[test]
    fn age_bias_old_boundaries() {
        let f = age_bias_old(Duration::from_secs(60));
        assert_eq!(f(secs(30)).as_str(), "30s");
        assert_eq!(f(secs(31)).as_str(), "45s");
        assert_eq!(f(secs(50)).as_str(), "52s");
        assert_eq!(f(secs(55)).as_str(), "60s");
    }

    #[test]
    fn latency_boundaries() {
        let f = latency(Duration::from_millis(100));
        assert_eq!(f(-5).as_str(), "negative_latency");
        assert_eq!(
            f(Duration::from_millis(101).as_nanos() as i64).as_str(),
            "slow"
        );
        assert_eq!(
            f(Duration::from_millis(20).as_nanos() as i64).as_str(),
            "025ms"
        );
    }

    #[test]
    fn bytes_labels() {
        let f = bytes(1024 * 10);
        assert_eq!(f(-1).as_str(), "negative");
        assert_eq!(f(1024 * 11).as_str(), "large");
        assert_eq!(f(1024).as_str(), "01_KiB");
    }

    #[test]
    fn decimal_labels() {
        let f = decimal(20_000);
        assert_eq!(f(2_400).as_str(), "02_k");
        assert_eq!(f(20_001).as_str(), "large");
    }
}
