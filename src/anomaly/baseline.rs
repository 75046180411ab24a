//! Small local statistics helper. No external stats crate: mean, stddev,
//! and percentiles are cheap enough to compute directly over a bounded
//! sample window without reaching for a dependency.

use serde::{Deserialize, Serialize};

/// Descriptive statistics over one metric's sample series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Compute mean/stdDev/median/q1/q3/iqr over `samples`. Population standard
/// deviation (divides by N, not N-1) since a baseline describes the
/// observed series itself, not a sample drawn from a larger population.
pub fn compute_baseline(samples: &[f64]) -> Baseline {
    if samples.is_empty() {
        return Baseline { mean: 0.0, std_dev: 0.0, median: 0.0, q1: 0.0, q3: 0.0, iqr: 0.0 };
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = percentile(&sorted, 0.5);
    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);

    Baseline { mean, std_dev, median, q1, q3, iqr: q3 - q1 }
}

/// Z-score of `value` against `baseline`. A zero-variance baseline (every
/// sample identical) reports a z-score of 0 for a matching value and an
/// unbounded-but-finite large score otherwise, so a flat series never
/// divides by zero.
pub fn z_score(value: f64, baseline: &Baseline) -> f64 {
    if baseline.std_dev == 0.0 {
        return if value == baseline.mean { 0.0 } else { f64::MAX };
    }
    (value - baseline.mean) / baseline.std_dev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_series_has_zero_std_dev() {
        let baseline = compute_baseline(&[100.0, 100.0, 100.0, 100.0, 100.0]);
        assert_eq!(baseline.std_dev, 0.0);
        assert_eq!(baseline.mean, 100.0);
    }

    #[test]
    fn spike_z_score_matches_manual_computation() {
        let samples = [100.0, 100.0, 100.0, 100.0, 100.0, 500.0];
        let baseline = compute_baseline(&samples);
        let z = z_score(500.0, &baseline);
        assert!((z - 2.236).abs() < 0.01, "z={z}");
    }

    #[test]
    fn quartiles_are_ordered() {
        let baseline = compute_baseline(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(baseline.q1 <= baseline.median);
        assert!(baseline.median <= baseline.q3);
        assert_eq!(baseline.iqr, baseline.q3 - baseline.q1);
    }
}
