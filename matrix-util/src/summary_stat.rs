//! Scalar summaries of `f64` slices. `NaN` entries are skipped
//! everywhere, the way pandas reductions treat missing values.

use std::cmp::Ordering;

/// Normalizing constant of the median absolute deviation so that it
/// estimates the standard deviation of a Gaussian: `Φ⁻¹(3/4)`
pub const MAD_NORMAL_CONSTANT: f64 = 0.674_489_750_196_081_7;

fn finite_sorted(xx: &[f64]) -> Vec<f64> {
    let mut ret: Vec<f64> = xx.iter().copied().filter(|x| !x.is_nan()).collect();
    ret.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    ret
}

/// Quantile with linear interpolation between the closest ranks
/// (numpy's default `percentile` method)
///
/// * `xx` - values
/// * `q` - quantile in `[0, 1]`
///
pub fn quantile(xx: &[f64], q: f64) -> Option<f64> {
    let sorted = finite_sorted(xx);
    quantile_sorted(&sorted, q)
}

/// Several quantiles at once, sorting the data only once
pub fn quantiles(xx: &[f64], qq: &[f64]) -> Vec<Option<f64>> {
    let sorted = finite_sorted(xx);
    qq.iter().map(|&q| quantile_sorted(&sorted, q)).collect()
}

fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lb = pos.floor() as usize;
    let ub = pos.ceil() as usize;
    let frac = pos - lb as f64;
    Some(sorted[lb] + (sorted[ub] - sorted[lb]) * frac)
}

pub fn median(xx: &[f64]) -> Option<f64> {
    quantile(xx, 0.5)
}

/// Median absolute deviation around the median, scaled by
/// `1/Φ⁻¹(3/4)`
pub fn mad(xx: &[f64]) -> Option<f64> {
    let med = median(xx)?;
    let dev: Vec<f64> = xx
        .iter()
        .filter(|x| !x.is_nan())
        .map(|x| (x - med).abs())
        .collect();
    median(&dev).map(|m| m / MAD_NORMAL_CONSTANT)
}

pub fn nan_mean(xx: &[f64]) -> Option<f64> {
    let (n, s) = xx
        .iter()
        .filter(|x| !x.is_nan())
        .fold((0_usize, 0_f64), |(n, s), &x| (n + 1, s + x));
    (n > 0).then(|| s / n as f64)
}

/// Sample standard deviation (`ddof = 1`); `None` with fewer than two
/// values
pub fn nan_std(xx: &[f64]) -> Option<f64> {
    let mu = nan_mean(xx)?;
    let (n, ss) = xx
        .iter()
        .filter(|x| !x.is_nan())
        .fold((0_usize, 0_f64), |(n, ss), &x| (n + 1, ss + (x - mu) * (x - mu)));
    (n > 1).then(|| (ss / (n - 1) as f64).sqrt())
}
