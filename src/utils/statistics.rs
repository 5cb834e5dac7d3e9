//! Statistical utility functions for risk calculations
//!
//! Callers validate lengths first; these helpers assume non-empty input and
//! return 0.0 where a statistic is undefined.

/// Calculate the mean of a slice of f64 values
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance with `ddof` delta degrees of freedom (0 = population, 1 = sample)
pub fn variance_ddof(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return 0.0;
    }

    let mean_val = mean(values);
    values.iter().map(|v| (v - mean_val).powi(2)).sum::<f64>() / (values.len() - ddof) as f64
}

/// Population variance
pub fn variance(values: &[f64]) -> f64 {
    variance_ddof(values, 0)
}

/// Sample variance (n-1 denominator)
pub fn sample_variance(values: &[f64]) -> f64 {
    variance_ddof(values, 1)
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Sample standard deviation (n-1 denominator)
pub fn sample_std_dev(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Sample covariance (n-1 denominator) of two equal-length series
pub fn sample_covariance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }

    let mean_x = mean(&x[..n]);
    let mean_y = mean(&y[..n]);
    x.iter()
        .zip(y.iter())
        .map(|(xi, yi)| (xi - mean_x) * (yi - mean_y))
        .sum::<f64>()
        / (n - 1) as f64
}

/// Percentile with linear interpolation between order statistics.
///
/// `p` is in [0, 1]. Matches the "linear" quantile definition: the value at
/// rank `p * (n - 1)`.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

/// [`percentile`] over an already ascending slice
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let n = sorted.len();
    let rank = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let index = rank.floor() as usize;

    if index >= n - 1 {
        sorted[n - 1]
    } else {
        let lower = sorted[index];
        let upper = sorted[index + 1];
        let weight = rank - index as f64;
        lower + weight * (upper - lower)
    }
}
