//! Fixed bucket boundaries used to estimate percentiles from counts alone.
//! The table covers the full i64 range with 276 roughly-logarithmic
//! buckets: powers of 4 with three intermediate steps each.

use lazy_static::lazy_static;

/// Number of buckets.
pub const LENGTH: usize = 276;

// Base-2 digits to shift when iterating over the i64 space.
const DIGITS: u32 = 2;

struct BucketTables {
    values: Vec<i64>,
    power_of_4_index: Vec<usize>,
}

fn init_tables() -> BucketTables {
    let mut values = vec![1i64, 2, 3];
    let mut power_of_4_index = vec![0usize];

    let mut exp = DIGITS;
    while exp < 64 {
        let mut current = 1i64 << exp;
        let delta = current / 3;
        // The final iteration wraps; its `next` goes negative and the inner
        // loop contributes nothing, leaving room for the i64::MAX cap.
        let next = current.wrapping_shl(DIGITS).wrapping_sub(delta);

        power_of_4_index.push(values.len());
        while current < next && current > 0 {
            values.push(current);
            current += delta;
        }
        exp += DIGITS;
    }
    values.push(i64::MAX);

    BucketTables {
        values,
        power_of_4_index,
    }
}

lazy_static! {
    static ref TABLES: BucketTables = {
        let tables = init_tables();
        debug_assert_eq!(tables.values.len(), LENGTH);
        tables
    };
}

/// Upper boundary of bucket `i`.
pub fn get(i: usize) -> i64 {
    TABLES.values[i]
}

/// Index of the bucket that `v` falls into.
pub fn index_of(v: i64) -> usize {
    if v <= 0 {
        return 0;
    }
    if v <= 4 {
        return v as usize;
    }

    let lz = v.leading_zeros();
    let mut shift = 64 - lz - 1;
    let prev_power_of_2 = (v >> shift) << shift;
    let mut prev_power_of_4 = prev_power_of_2;
    if shift % 2 != 0 {
        shift -= 1;
        prev_power_of_4 >>= 1;
    }

    let base = prev_power_of_4;
    let delta = base / 3;
    let offset = ((v - base) / delta) as usize;
    let pos = offset + TABLES.power_of_4_index[(shift / 2) as usize];
    if pos >= LENGTH - 1 {
        LENGTH - 1
    } else {
        pos + 1
    }
}

/// Upper boundary of the bucket that `v` falls into.
pub fn bucket(v: i64) -> i64 {
    get(index_of(v))
}

/// Compute percentile estimates from per-bucket counts.
///
/// `pcts` must be sorted, with each value in `0.0 ..= 100.0`. One result is
/// produced per requested percentile, interpolated linearly within the
/// enclosing bucket.
pub fn percentiles(counts: &[i64; LENGTH], pcts: &[f64], results: &mut Vec<f64>) {
    let total: i64 = counts.iter().sum();

    results.clear();
    results.resize(pcts.len(), 0.0);

    let mut pct_idx = 0;
    let mut prev: i64 = 0;
    let mut prev_p = 0.0;
    let mut prev_b: i64 = 0;

    for i in 0..LENGTH {
        let next = prev + counts[i];
        let next_p = 100.0 * next as f64 / total as f64;
        let next_b = get(i);
        while pct_idx < pcts.len() && next_p >= pcts[pct_idx] {
            let f = (pcts[pct_idx] - prev_p) / (next_p - prev_p);
            results[pct_idx] = f * (next_b - prev_b) as f64 + prev_b as f64;
            pct_idx += 1;
        }
        if pct_idx >= pcts.len() {
            break;
        }
        prev = next;
        prev_p = next_p;
        prev_b = next_b;
    }

    let next_p = 100.0;
    let next_b = i64::MAX;
    while pct_idx < pcts.len() {
        let f = (pcts[pct_idx] - prev_p) / (next_p - prev_p);
        results[pct_idx] = f * (next_b - prev_b) as f64 + prev_b as f64;
        pct_idx += 1;
    }
}

pub fn percentile(counts: &[i64; LENGTH], p: f64) -> f64 {
    let mut results = Vec::new();
    percentiles(counts, &[p], &mut results);
    results[0]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_shape() {
        assert_eq!(get(0), 1);
        assert_eq!(get(1), 2);
        assert_eq!(get(2), 3);
        assert_eq!(get(3), 4);
        assert_eq!(get(LENGTH - 1), i64::MAX);
    }

    #[test]
    fn index_boundaries() {
        assert_eq!(index_of(-1), 0);
        assert_eq!(index_of(0), 0);
        for v in 1..=4i64 {
            assert!(index_of(v) <= 4);
        }
        assert_eq!(index_of(i64::MAX), LENGTH - 1);
    }

    #[test]
    fn index_is_monotonic_and_encloses() {
        let mut prev = 0;
        for exp in 0..62 {
            let v = 1i64 << exp;
            let idx = index_of(v);
            assert!(idx >= prev, "index not monotonic at {}", v);
            assert!(get(idx) >= v, "bucket {} does not enclose {}", get(idx), v);
            prev = idx;
        }
    }

    #[test]
    fn percentile_of_uniform_counts() {
        let mut counts = [0i64; LENGTH];
        // Every value recorded as 100: the estimate lands in that bucket.
        counts[index_of(100)] = 1_000;

        let p50 = percentile(&counts, 50.0);
        let b = bucket(100);
        assert!(p50 <= b as f64);
        assert!(p50 >= get(index_of(100) - 1) as f64);
    }

    #[test]
    fn spread_counts() {
        let mut counts = [0i64; LENGTH];
        for v in [10i64, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            counts[index_of(v)] += 1;
        }
        let p = percentile(&counts, 90.0);
        assert!(p >= 80.0 && p <= bucket(100) as f64);
    }
}
