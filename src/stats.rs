//! Statistics accumulator: running count/sum/min/max plus an append-only
//! sample vector, sealed once into a [`Sealed`] snapshot of the percentiles
//! SPEC_FULL.md §4.1 requires.
//!
//! Grounded on the teacher's `CallPathTiming` in `reqray`'s `internal.rs`,
//! which tracks `call_count`/`sum_with_children`/`sum_own` per node; this
//! accumulator generalizes that running-sum approach to retain every sample
//! so percentiles can be computed post-hoc.

use std::time::Duration;

/// Per-function running aggregate. Mutated on every completed entry/leave
/// pair; immutable once [`Accumulator::seal`] has been called.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    count: u64,
    sum: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
    samples: Vec<Duration>,
}

/// The immutable statistics snapshot produced by [`Accumulator::seal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sealed {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub median: Duration,
    pub p50: Duration,
    pub p75: Duration,
    pub p90: Duration,
    pub p99: Duration,
    /// Sample standard deviation in nanoseconds (unbiased, N-1 estimator).
    pub std_dev_nanos: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed entry/leave pair into the running aggregate.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.sum += duration;
        self.min = Some(self.min.map_or(duration, |m| m.min(duration)));
        self.max = Some(self.max.map_or(duration, |m| m.max(duration)));
        self.samples.push(duration);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Compute the immutable percentile snapshot. Panics if no samples were
    /// ever recorded -- callers must not seal an accumulator with
    /// `count() == 0` (every CallMetrics node is only created on first
    /// entry, so this invariant always holds in practice).
    pub fn seal(&self) -> Sealed {
        assert!(self.count > 0, "cannot seal an accumulator with no samples");

        let mut sorted = self.samples.clone();
        sorted.sort();
        let n = sorted.len();

        let mean_nanos = self.sum.as_nanos() as f64 / n as f64;
        let mean = Duration::from_nanos(mean_nanos.round() as u64);

        let std_dev_nanos = if n > 1 {
            let variance = sorted
                .iter()
                .map(|d| {
                    let diff = d.as_nanos() as f64 - mean_nanos;
                    diff * diff
                })
                .sum::<f64>()
                / (n - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        let percentile = |k: u64| -> Duration {
            let idx = ((k as f64 * n as f64) / 100.0).ceil() as i64 - 1;
            let idx = idx.clamp(0, n as i64 - 1) as usize;
            sorted[idx]
        };

        let median_idx = (n - 1) / 2;

        Sealed {
            count: self.count,
            total: self.sum,
            min: self.min.expect("recorded"),
            max: self.max.expect("recorded"),
            mean,
            median: sorted[median_idx],
            p50: percentile(50),
            p75: percentile(75),
            p90: percentile(90),
            p99: percentile(99),
            std_dev_nanos,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_sample_percentiles_all_equal_stddev_zero() {
        let mut acc = Accumulator::new();
        acc.record(Duration::from_millis(42));
        let sealed = acc.seal();

        assert_eq!(sealed.count, 1);
        assert_eq!(sealed.min, Duration::from_millis(42));
        assert_eq!(sealed.max, Duration::from_millis(42));
        assert_eq!(sealed.mean, Duration::from_millis(42));
        assert_eq!(sealed.median, Duration::from_millis(42));
        assert_eq!(sealed.p50, Duration::from_millis(42));
        assert_eq!(sealed.p75, Duration::from_millis(42));
        assert_eq!(sealed.p90, Duration::from_millis(42));
        assert_eq!(sealed.p99, Duration::from_millis(42));
        assert_eq!(sealed.std_dev_nanos, 0.0);
    }

    #[test]
    fn percentiles_are_monotone_non_decreasing() {
        let mut acc = Accumulator::new();
        for i in 1..=100u64 {
            acc.record(Duration::from_micros(i));
        }
        let sealed = acc.seal();
        assert!(sealed.min <= sealed.mean);
        assert!(sealed.mean <= sealed.max);
        assert!(sealed.min <= sealed.median);
        assert!(sealed.median <= sealed.max);
        assert!(sealed.p50 <= sealed.p75);
        assert!(sealed.p75 <= sealed.p90);
        assert!(sealed.p90 <= sealed.p99);
    }

    #[test]
    fn even_sample_count_uses_lower_median() {
        let mut acc = Accumulator::new();
        for d in [10u64, 20, 30, 40] {
            acc.record(Duration::from_millis(d));
        }
        // sorted: [10, 20, 30, 40], (n-1)/2 = 1 -> index 1 -> 20ms
        assert_eq!(acc.seal().median, Duration::from_millis(20));
    }

    #[test]
    fn p50_equals_median_by_construction() {
        let mut acc = Accumulator::new();
        for d in [5u64, 1, 9, 3, 7, 2] {
            acc.record(Duration::from_millis(d));
        }
        let sealed = acc.seal();
        assert_eq!(sealed.p50, sealed.median);
    }
}
