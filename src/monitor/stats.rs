//! Distribution statistics over completed-event durations.
//!
//! Every reporting value is rounded to the nearest integer, half away
//! from zero (`f64::round`). Inputs are non-negative so this is the same
//! as rounding half up.

use hdrhistogram::Histogram;
use serde::Serialize;

use super::clock::{Nanos, NANOS_PER_MICRO};

// ─── Calculator ──────────────────────────────────────────────────

pub fn min(xs: &[u64]) -> u64 {
    xs.iter().copied().min().unwrap_or(0)
}

pub fn max(xs: &[u64]) -> u64 {
    xs.iter().copied().max().unwrap_or(0)
}

/// 64-bit sum; saturates instead of wrapping on absurd inputs.
pub fn sum(xs: &[u64]) -> u64 {
    xs.iter().fold(0u64, |acc, &x| acc.saturating_add(x))
}

pub fn mean(xs: &[u64], n: usize) -> u64 {
    if n == 0 {
        return 0;
    }
    round(sum(xs) as f64 / n as f64)
}

/// Population standard deviation (divides by `n`), unrounded.
pub fn population_stdev(xs: &[u64], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let mean = sum(xs) as f64 / n;
    let variance = xs
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    variance.sqrt()
}

pub fn stdev(xs: &[u64], n: usize) -> u64 {
    round(population_stdev(xs, n))
}

pub fn range(xs: &[u64]) -> u64 {
    max(xs) - min(xs)
}

/// Nearest non-negative integer, half away from zero.
pub fn round(x: f64) -> u64 {
    if x.is_nan() || x <= 0.0 {
        0
    } else {
        x.round() as u64
    }
}

// ─── Distribution record ─────────────────────────────────────────

/// Stats-view record for one (instance, operation) pair, microseconds.
///
/// `callbacks` and `sum` are extrapolated by the sample-rate multiplier;
/// every other field describes the raw observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub callbacks: u64,
    pub min: u64,
    pub max: u64,
    pub mean: u64,
    pub stdev: u64,
    pub sum: u64,
    pub range: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl Distribution {
    /// Build from raw durations. Aggregates are taken in nanoseconds and
    /// converted to microseconds once, so `sum` tracks the summary
    /// view's total instead of accumulating per-sample rounding.
    /// Sorts a private copy; the caller's order is left alone.
    pub fn from_nanos(samples: &[Nanos], multiplier: f64) -> Self {
        if samples.is_empty() {
            return Self::empty();
        }

        let mut xs = samples.to_vec();
        xs.sort_unstable();
        let n = xs.len();
        let (p50, p95, p99) = percentiles(&xs);
        let lo = micros(min(&xs) as f64);
        let hi = micros(max(&xs) as f64);

        Self {
            callbacks: round(n as f64 * multiplier),
            min: lo,
            max: hi,
            mean: micros(sum(&xs) as f64 / n as f64),
            stdev: micros(population_stdev(&xs, n)),
            sum: micros(sum(&xs) as f64 * multiplier),
            range: hi - lo,
            p50: micros(p50 as f64),
            p95: micros(p95 as f64),
            p99: micros(p99 as f64),
        }
    }

    /// All-zero record for operations with no completed events.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_data(&self) -> bool {
        self.callbacks > 0
    }
}

fn micros(ns: f64) -> u64 {
    round(ns / NANOS_PER_MICRO as f64)
}

/// p50/p95/p99 through an auto-resizing HdrHistogram (3 significant
/// figures).
fn percentiles(xs: &[u64]) -> (u64, u64, u64) {
    let Ok(mut hist) = Histogram::<u64>::new(3) else {
        return (0, 0, 0);
    };
    for &x in xs {
        let _ = hist.record(x);
    }
    if hist.len() == 0 {
        return (0, 0, 0);
    }
    (
        hist.value_at_quantile(0.50),
        hist.value_at_quantile(0.95),
        hist.value_at_quantile(0.99),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_all_zero() {
        let xs: [u64; 0] = [];
        assert_eq!(min(&xs), 0);
        assert_eq!(max(&xs), 0);
        assert_eq!(mean(&xs, 0), 0);
        assert_eq!(stdev(&xs, 0), 0);
        assert_eq!(sum(&xs), 0);
        assert_eq!(range(&xs), 0);
        assert_eq!(Distribution::from_nanos(&xs, 1.0), Distribution::empty());
    }

    #[test]
    fn test_single_sample() {
        let d = Distribution::from_nanos(&[5_000], 1.0);
        assert_eq!(d.callbacks, 1);
        assert_eq!(d.min, 5);
        assert_eq!(d.max, 5);
        assert_eq!(d.mean, 5);
        assert_eq!(d.stdev, 0);
        assert_eq!(d.sum, 5);
        assert_eq!(d.range, 0);
        assert_eq!(d.p50, 5);
    }

    #[test]
    fn test_three_samples() {
        let xs = [2, 4, 6];
        assert_eq!(min(&xs), 2);
        assert_eq!(max(&xs), 6);
        assert_eq!(mean(&xs, 3), 4);
        assert_eq!(sum(&xs), 12);
        assert_eq!(range(&xs), 4);

        let sd = population_stdev(&xs, 3);
        assert!((sd - 1.63).abs() < 0.01, "stdev was {sd}");
        assert_eq!(stdev(&xs, 3), 2);
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let d = Distribution::from_nanos(&[6_000, 2_000, 4_000], 1.0);
        assert_eq!(d.min, 2);
        assert_eq!(d.max, 6);
        assert_eq!(d.range, 4);
    }

    #[test]
    fn test_multiplier_scales_only_volume() {
        let d = Distribution::from_nanos(&[10_000, 20_000, 30_000], 2.0);
        assert_eq!(d.callbacks, 6);
        assert_eq!(d.sum, 120);
        assert_eq!(d.mean, 20);
        assert_eq!(d.min, 10);
        assert_eq!(d.max, 30);
    }

    #[test]
    fn test_sub_micro_remainders_are_not_lost() {
        let d = Distribution::from_nanos(&[1_499, 1_499, 1_499], 1.0);
        // 4_497 ns in total; rounding each sample first would give 3
        assert_eq!(d.sum, 4);
        assert_eq!(d.mean, 1);
        assert_eq!(d.min, 1);
        assert_eq!(d.max, 1);
        assert_eq!(d.range, 0);
        assert_eq!(d.stdev, 0);
    }

    #[test]
    fn test_stdev_in_micros() {
        let d = Distribution::from_nanos(&[2_000, 4_000, 6_000], 1.0);
        assert_eq!(d.stdev, 2);
        assert_eq!(d.mean, 4);
        assert_eq!(d.p50, 4);
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round(2.5), 3);
        assert_eq!(round(2.49), 2);
        assert_eq!(round(-1.0), 0);
        assert_eq!(round(f64::NAN), 0);
    }
}
