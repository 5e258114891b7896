//! Robust scalar aggregation for Byzantine-resilient consensus
//!
//! Median-centred clipping and trimmed means over per-node scalar reports.
//! With `trim = f` the result tolerates up to `f` arbitrary values.

use alloc::vec::Vec;

use crate::{Error, Result};

#[inline]
pub(crate) fn sqrt_f64(x: f64) -> f64 {
    #[cfg(feature = "std")]
    {
        x.sqrt()
    }
    #[cfg(not(feature = "std"))]
    {
        // Newton-Raphson; fixed iteration count for determinism.
        if x <= 0.0 {
            return 0.0;
        }
        let mut y = if x > 1.0 { x / 2.0 } else { 1.0 };
        for _ in 0..32 {
            y = 0.5 * (y + (x / y));
        }
        y
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
    v
}

fn median_of_sorted(v: &[f64]) -> f64 {
    let n = v.len();
    if n % 2 == 0 {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    } else {
        v[n / 2]
    }
}

/// Median of `values`, `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(median_of_sorted(&sorted(values)))
}

/// Mean and population standard deviation, `None` when empty
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some((mean, sqrt_f64(var)))
}

/// Mean after dropping the `trim` lowest and `trim` highest values
pub fn trimmed_mean(values: &[f64], trim: usize) -> Result<f64> {
    let n = values.len();
    if n == 0 || n <= 2 * trim {
        return Err(Error::InsufficientReports {
            have: n,
            need: 2 * trim + 1,
        });
    }
    let v = sorted(values);
    let kept = &v[trim..n - trim];
    Ok(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Outcome of median-centred clipping followed by a trimmed mean
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedAggregate {
    /// Accepted value
    pub value: f64,
    /// Median of the raw values
    pub median: f64,
    /// Lower clip bound (`median − Δ`)
    pub lower: f64,
    /// Upper clip bound (`median + Δ`)
    pub upper: f64,
    /// Indices (into the input) whose raw value lay outside the bound
    pub outliers: Vec<usize>,
}

/// Clip every value to `[median − Δ, median + Δ]`, drop the `trim` lowest and
/// highest clipped values, and average the rest.
///
/// Raw values strictly outside the bound are reported as outliers.
pub fn clip_and_trim(values: &[f64], delta: f64, trim: usize) -> Result<ClippedAggregate> {
    let center = median(values).ok_or(Error::InsufficientReports {
        have: 0,
        need: 2 * trim + 1,
    })?;
    let delta = if delta.is_finite() && delta >= 0.0 { delta } else { 0.0 };
    let lower = center - delta;
    let upper = center + delta;

    let mut outliers = Vec::new();
    let clipped: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v < lower || v > upper {
                outliers.push(i);
            }
            v.clamp(lower, upper)
        })
        .collect();

    Ok(ClippedAggregate {
        value: trimmed_mean(&clipped, trim)?,
        median: center,
        lower,
        upper,
        outliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn trimmed_mean_drops_extremes() {
        let v = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(trimmed_mean(&v, 1).unwrap(), 3.0);
        assert!(trimmed_mean(&v[..2], 1).is_err());
    }

    #[test]
    fn clip_and_trim_resists_single_outlier() {
        let values = [42.0, 43.0, 41.0, 44.0, 500.0];
        let agg = clip_and_trim(&values, 10.0, 1).unwrap();
        assert_eq!(agg.median, 43.0);
        assert_eq!(agg.outliers, vec![4]);
        assert!((agg.value - 42.5).abs() / 42.5 < 0.02);
    }

    #[test]
    fn clip_bound_is_inclusive() {
        let agg = clip_and_trim(&[10.0, 10.0, 15.0], 5.0, 0).unwrap();
        assert!(agg.outliers.is_empty());
    }

    #[test]
    fn mean_and_std_population() {
        let (m, s) = mean_and_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(m, 5.0);
        assert!((s - 2.0).abs() < 1e-12);
    }

    #[test]
    fn clip_and_trim_rejects_empty_input() {
        assert!(clip_and_trim(&[], 1.0, 0).is_err());
        assert!(clip_and_trim(&[1.0, 2.0], 1.0, 1).is_err());
    }
}
