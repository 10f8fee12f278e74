//! Statistics Utilities
//!
//! Small numeric helpers shared across the SDK: cumulative sums, summary
//! statistics, and weighted random sampling used when drawing training
//! subsets.
//!
//! @version 0.1.0
//! @author Veris Development Team

use std::collections::BTreeMap;

use rand::Rng;

use crate::error::{Error, Result};

/// Returns the cumulative sum of `vals`, with a leading zero, so that
/// `cum_sum(v)[i+1] - cum_sum(v)[i] == v[i]`.
#[must_use]
pub fn cum_sum(vals: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(vals.len() + 1);
    out.push(0.0);
    let mut acc = 0.0;
    for &v in vals {
        acc += v;
        out.push(acc);
    }
    out
}

/// Returns the mean and standard deviation of `vals` (population form).
/// Both are 0 for an empty slice.
#[must_use]
pub fn mean_std_dev(vals: &[f64]) -> (f64, f64) {
    if vals.is_empty() {
        return (0.0, 0.0);
    }
    let mean = vals.iter().sum::<f64>() / vals.len() as f64;
    let variance = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / vals.len() as f64;
    (mean, variance.sqrt())
}

/// Returns the median of `vals`, or NaN for an empty slice.
#[must_use]
pub fn median(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    let mut sorted = vals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}

/// Returns the most frequent value in `vals`.
///
/// Ties are broken toward the smallest tied value.
pub fn mode(vals: &[i64]) -> Result<i64> {
    if vals.is_empty() {
        return Err(Error::invalid_argument("mode of an empty slice"));
    }
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &v in vals {
        *counts.entry(v).or_insert(0) += 1;
    }
    let mut best = (*counts.iter().next().unwrap().0, 0usize);
    for (&v, &count) in &counts {
        if count > best.1 {
            best = (v, count);
        }
    }
    Ok(best.0)
}

/// Draws `n` indices from `[0, weights.len())` with probability proportional
/// to each weight. Weights must be non-negative and must not all be zero; the
/// cumulative distribution is normalized by its final entry.
///
/// With `unique` set, no index repeats (inefficient when `n` approaches the
/// number of positive weights).
pub fn rand_sample_weighted<R: Rng>(
    rng: &mut R,
    n: usize,
    weights: &[f64],
    unique: bool,
) -> Result<Vec<usize>> {
    if weights.is_empty() {
        return Err(Error::invalid_argument("sampling from empty weights"));
    }
    let mut cdf = cum_sum(weights);
    let total = *cdf.last().unwrap();
    if total <= 0.0 {
        return Err(Error::invalid_argument("weights sum to zero"));
    }
    for v in &mut cdf {
        *v /= total;
    }

    let mut samples = Vec::with_capacity(n);
    while samples.len() < n {
        let r: f64 = rng.gen();
        for j in 0..weights.len() {
            if r >= cdf[j] && r <= cdf[j + 1] {
                if !unique || !samples.contains(&j) {
                    samples.push(j);
                }
                break;
            }
        }
    }
    Ok(samples)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_cum_sum() {
        assert_eq!(cum_sum(&[1.0, 2.0, 3.0]), vec![0.0, 1.0, 3.0, 6.0]);
        assert_eq!(cum_sum(&[]), vec![0.0]);
    }

    #[test]
    fn test_mean_std_dev() {
        let (mean, std) = mean_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_mode_breaks_ties_low() {
        assert_eq!(mode(&[5, 1, 5, 1, 2]).unwrap(), 1);
        assert_eq!(mode(&[7, 7, 3]).unwrap(), 7);
        assert!(mode(&[]).is_err());
    }

    #[test]
    fn test_weighted_sample_respects_zero_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples = rand_sample_weighted(&mut rng, 64, &[0.0, 1.0, 0.0], false).unwrap();
        assert!(samples.iter().all(|&s| s == 1));
    }

    #[test]
    fn test_weighted_sample_rejects_zero_total() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(rand_sample_weighted(&mut rng, 4, &[0.0, 0.0], false).is_err());
    }

    #[test]
    fn test_weighted_sample_unique() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut samples = rand_sample_weighted(&mut rng, 3, &[1.0, 1.0, 1.0], true).unwrap();
        samples.sort_unstable();
        assert_eq!(samples, vec![0, 1, 2]);
    }
}
