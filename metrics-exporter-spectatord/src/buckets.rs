//! Percentile approximation using a fixed set of logarithmic buckets.
//!
//! Rather than storing every observed sample, percentile-style meters map each sample to one of a small, fixed number
//! of buckets and only keep a count per bucket. Bucket boundaries are laid out so that, within each power-of-4
//! interval, consecutive boundaries are a third of the interval's base apart, which bounds the relative error of a
//! reconstructed percentile to roughly 33%.
//!
//! The boundary table is computed once per process and shared read-only by every caller.

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

use crate::atomics::{AtomicF64, AtomicMax};

/// Number of buckets in the percentile bucket table.
pub const PERCENTILE_BUCKETS_LENGTH: usize = 276;

/// Number of binary digits covered by each interval of the table, i.e. intervals are powers of 4.
const DIGITS: u32 = 2;

/// Values up to this bound map directly to the bucket at the same index.
const DIRECT_LOOKUP_MAX: i64 = 15;

static TABLE: Lazy<BucketTable> = Lazy::new(BucketTable::new);

struct BucketTable {
    values: Vec<i64>,
    power_of_4_index: Vec<usize>,
}

impl BucketTable {
    fn new() -> Self {
        let mut values = vec![1, 2, 3];
        let mut power_of_4_index = vec![0];

        let mut exp = DIGITS;
        while exp < 64 {
            let mut current: i64 = 1 << exp;
            let delta = current / 3;
            // For the last interval the shift pushes every bit out, so no boundaries are generated for it and the
            // sentinel covers the remainder of the range.
            let next = (current << DIGITS) - delta;
            power_of_4_index.push(values.len());

            while current < next {
                values.push(current);
                current += delta;
            }

            exp += DIGITS;
        }

        values.push(i64::MAX);

        BucketTable { values, power_of_4_index }
    }
}

/// Returns the number of buckets in the table.
pub fn buckets_len() -> usize {
    TABLE.values.len()
}

/// Returns all bucket boundaries, in increasing order.
pub fn boundaries() -> &'static [i64] {
    &TABLE.values
}

/// Returns the index of the bucket that covers `v`.
///
/// This is computed in constant time from the position of the highest set bit of `v`, without searching the table.
pub fn bucket_index(v: i64) -> usize {
    if v <= 0 {
        return 0;
    }
    if v <= DIRECT_LOOKUP_MAX {
        return v as usize;
    }

    let table = &*TABLE;
    let mut shift = 63 - v.leading_zeros();
    let prev_power_of_2 = (v >> shift) << shift;
    let mut prev_power_of_4 = prev_power_of_2;
    if shift % 2 != 0 {
        shift -= 1;
        prev_power_of_4 = prev_power_of_2 >> 1;
    }

    let base = prev_power_of_4;
    let delta = base / 3;
    let offset = ((v - base) / delta) as usize;
    let pos = offset + table.power_of_4_index[(shift / 2) as usize];
    if pos >= table.values.len() - 1 {
        table.values.len() - 1
    } else {
        pos + 1
    }
}

/// Returns the upper boundary of the bucket that covers `v`.
pub fn bucket(v: i64) -> i64 {
    TABLE.values[bucket_index(v)]
}

/// Computes the requested percentiles from a set of per-bucket counts.
///
/// `counts` holds one occurrence count per bucket, indexed the same way as [`boundaries`]. Missing trailing entries are
/// treated as zero. `pcts` must be sorted in non-decreasing order, with each value in the range `[0, 100]`.
///
/// Each result is interpolated linearly between the boundaries of the bucket in which the requested percentile falls.
/// When `counts` holds no samples at all, every result is `0.0`.
pub fn percentiles(counts: &[u64], pcts: &[f64]) -> Vec<f64> {
    let mut results = vec![0.0; pcts.len()];

    let total: u64 = counts.iter().sum();
    if total == 0 {
        return results;
    }
    let total = total as f64;

    let mut pct_index = 0;
    let mut prev = 0u64;
    let mut prev_p = 0.0;
    let mut prev_b = 0i64;
    for (i, &next_b) in TABLE.values.iter().enumerate() {
        let next = prev + counts.get(i).copied().unwrap_or(0);
        let next_p = 100.0 * next as f64 / total;
        while pct_index < pcts.len() && next_p >= pcts[pct_index] {
            let f = if next_p > prev_p { (pcts[pct_index] - prev_p) / (next_p - prev_p) } else { 0.0 };
            results[pct_index] = f * (next_b - prev_b) as f64 + prev_b as f64;
            pct_index += 1;
        }
        if pct_index >= pcts.len() {
            break;
        }

        prev = next;
        prev_p = next_p;
        prev_b = next_b;
    }

    results
}

/// Computes a single percentile from a set of per-bucket counts.
///
/// See [`percentiles`] for details.
pub fn percentile(counts: &[u64], pct: f64) -> f64 {
    percentiles(counts, &[pct])[0]
}

/// Returns the tag value identifying the bucket at `index`, such as `T0042` for timers.
///
/// Percentile meters report one counter per bucket, each distinguished by a `percentile` tag built from a single
/// character prefix and the zero-padded, hexadecimal bucket index.
pub fn bucket_tag_value(prefix: char, index: usize) -> String {
    format!("{}{:04X}", prefix, index)
}

/// A concurrent, fixed-size histogram over the percentile bucket table.
///
/// Recording a sample increments a single atomic counter, so `PercentileBuckets` can be shared freely across threads.
/// Alongside the bucket counts, the total, sum of squares and maximum of all recorded samples are tracked.
#[derive(Debug)]
pub struct PercentileBuckets {
    counts: Box<[AtomicU64]>,
    count: AtomicU64,
    total: AtomicU64,
    total_of_squares: AtomicF64,
    max: AtomicMax,
}

impl PercentileBuckets {
    /// Creates an empty `PercentileBuckets`.
    pub fn new() -> Self {
        let counts = (0..buckets_len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            counts,
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            total_of_squares: AtomicF64::new(0.0),
            max: AtomicMax::new(0),
        }
    }

    /// Records a sample.
    ///
    /// Negative samples are ignored.
    pub fn record(&self, v: i64) {
        if v < 0 {
            return;
        }

        self.counts[bucket_index(v)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(v as u64, Ordering::Relaxed);
        self.total_of_squares.add((v as f64) * (v as f64));
        self.max.update(v);
    }

    /// Gets the number of recorded samples.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Gets the sum of all recorded samples.
    pub fn total_amount(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Gets the sum of the squares of all recorded samples.
    pub fn total_of_squares(&self) -> f64 {
        self.total_of_squares.get()
    }

    /// Gets the largest recorded sample, or zero if nothing was recorded.
    pub fn max(&self) -> i64 {
        self.max.get()
    }

    /// Takes a snapshot of the per-bucket counts.
    pub fn counts(&self) -> Vec<u64> {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Estimates the given percentile over all recorded samples.
    pub fn percentile(&self, pct: f64) -> f64 {
        percentile(&self.counts(), pct)
    }

    /// Estimates the given percentiles over all recorded samples.
    ///
    /// `pcts` must be sorted in non-decreasing order.
    pub fn percentiles(&self, pcts: &[f64]) -> Vec<f64> {
        percentiles(&self.counts(), pcts)
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        for c in self.counts.iter() {
            c.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        self.total_of_squares.set(0.0);
        self.max.reset();
    }
}

impl Default for PercentileBuckets {
    fn default() -> Self {
        Self::new()
    }
}
