//! Engle-Granger two-step cointegration test.
//!
//! 1. OLS `y = a + b·x`.
//! 2. Augmented Dickey-Fuller regression on the residuals without constant,
//!    `Δe_t = γ·e_{t-1} + Σ φ_i·Δe_{t-i} + ε_t`, lag order chosen by AIC.
//!
//! The t-statistic of `γ` is compared with MacKinnon's response surfaces for
//! two variables with a constant.

use crate::error::{Result, RiskError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// MacKinnon (1994) approximate p-value bounds and coefficients for N = 2,
/// constant term.
const TAU_MAX: f64 = 0.92;
const TAU_MIN: f64 = -18.86;
const TAU_STAR: f64 = -2.62;
const TAU_SMALL_P: [f64; 3] = [2.92, 1.5012, 0.039796];
const TAU_LARGE_P: [f64; 4] = [2.1945, 0.64695, -0.29198, -0.042377];

/// MacKinnon (2010) critical-value response surfaces `b0 + b1/T + b2/T²`
/// for N = 2, constant term, at 1%, 5% and 10%.
const CRITICAL_SURFACES: [[f64; 3]; 3] = [
    [-3.89644, -10.9519, -22.527],
    [-3.33613, -6.1101, -6.823],
    [-3.04445, -4.2412, -2.720],
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalValues {
    pub one_percent: f64,
    pub five_percent: f64,
    pub ten_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CointegrationResult {
    /// ADF t-statistic on the residuals
    pub statistic: f64,
    pub p_value: f64,
    pub critical_values: CriticalValues,
    /// Lag order selected for the ADF regression
    pub lags: usize,
    pub intercept: f64,
    /// Slope of `y` on `x`
    pub hedge_ratio: f64,
    pub observations: usize,
}

impl CointegrationResult {
    pub fn is_cointegrated(&self, significance: f64) -> bool {
        self.p_value < significance
    }
}

/// Least squares `y = X·β`. Singular normal equations are a matrix error.
fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>, f64)> {
    let xt = x.transpose();
    let xtx_inv = (&xt * x)
        .try_inverse()
        .ok_or_else(|| RiskError::Matrix("singular design matrix in least squares".to_string()))?;
    let beta = &xtx_inv * (&xt * y);
    let ssr = (y - x * &beta).norm_squared();
    Ok((beta, xtx_inv, ssr))
}

/// OLS of `y` on `x` with intercept: `(intercept, slope, residuals)`.
pub fn ols(y: &[f64], x: &[f64]) -> Result<(f64, f64, Vec<f64>)> {
    if y.len() != x.len() {
        return Err(RiskError::LengthMismatch {
            metric: "ols",
            left: y.len(),
            right: x.len(),
        });
    }
    let n = y.len();
    let design = DMatrix::from_fn(n, 2, |r, c| if c == 0 { 1.0 } else { x[r] });
    let target = DVector::from_column_slice(y);
    let (beta, _, _) = least_squares(&design, &target)?;
    let residuals = y
        .iter()
        .zip(x)
        .map(|(yi, xi)| yi - beta[0] - beta[1] * xi)
        .collect();
    Ok((beta[0], beta[1], residuals))
}

/// Schwert's rule `12·(n/100)^¼`.
pub fn default_max_lag(n: usize) -> usize {
    (12.0 * (n as f64 / 100.0).powf(0.25)).floor() as usize
}

/// ADF regression rows `first..diffs.len()` for lag order `lags`.
fn adf_design(levels: &[f64], diffs: &[f64], lags: usize, first: usize) -> (DMatrix<f64>, DVector<f64>) {
    let rows = diffs.len() - first;
    let x = DMatrix::from_fn(rows, lags + 1, |r, c| {
        let t = first + r;
        if c == 0 {
            levels[t]
        } else {
            diffs[t - c]
        }
    });
    let y = DVector::from_iterator(rows, diffs[first..].iter().copied());
    (x, y)
}

/// ADF t-statistic without constant, lag chosen by AIC over `0..=max_lag`
/// on a common sample. Returns `(statistic, lags)`.
pub fn adf_statistic(series: &[f64], max_lag: usize) -> Result<(f64, usize)> {
    let n = series.len();
    if n < 4 {
        return Err(RiskError::domain("adf_statistic", "need at least four observations", n));
    }
    let max_lag = max_lag.min((n - 3) / 2);
    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    let mut best = (f64::INFINITY, 0);
    for lags in 0..=max_lag {
        let (x, y) = adf_design(series, &diffs, lags, max_lag);
        let (_, _, ssr) = least_squares(&x, &y)?;
        let nobs = y.len() as f64;
        let aic = nobs * (ssr / nobs).ln() + 2.0 * (lags + 1) as f64;
        if aic < best.0 {
            best = (aic, lags);
        }
    }
    let lags = best.1;

    let (x, y) = adf_design(series, &diffs, lags, lags);
    let (beta, xtx_inv, ssr) = least_squares(&x, &y)?;
    let dof = (y.len() - (lags + 1)) as f64;
    let se = (ssr / dof * xtx_inv[(0, 0)]).sqrt();
    Ok((beta[0] / se, lags))
}

/// MacKinnon (1994) approximate p-value of an Engle-Granger statistic for
/// two variables with constant.
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let coefficients: &[f64] = if statistic <= TAU_STAR {
        &TAU_SMALL_P
    } else {
        &TAU_LARGE_P
    };
    let polynomial = coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, c| acc * statistic + c);
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(polynomial),
        Err(_) => f64::NAN,
    }
}

/// MacKinnon (2010) critical values for `observations` residuals.
pub fn mackinnon_critical_values(observations: usize) -> CriticalValues {
    let t = observations.max(1) as f64;
    let surface = |b: &[f64; 3]| b[0] + b[1] / t + b[2] / (t * t);
    CriticalValues {
        one_percent: surface(&CRITICAL_SURFACES[0]),
        five_percent: surface(&CRITICAL_SURFACES[1]),
        ten_percent: surface(&CRITICAL_SURFACES[2]),
    }
}

/// Engle-Granger test of `y` against `x`. `max_lag` defaults to Schwert's rule.
fn is_constant(series: &[f64]) -> bool {
    series.windows(2).all(|w| w[0] == w[1])
}

pub fn engle_granger(y: &[f64], x: &[f64], max_lag: Option<usize>) -> Result<CointegrationResult> {
    let n = y.len();
    if n < 4 {
        return Err(RiskError::domain("engle_granger", "need at least four observations", n));
    }
    if y.iter().chain(x).any(|v| !v.is_finite()) {
        return Err(RiskError::InvalidInput(
            "cointegration inputs must be finite".to_string(),
        ));
    }
    if is_constant(y) || is_constant(x) {
        return Err(RiskError::domain(
            "engle_granger",
            "a constant series has no stochastic trend to share",
            n,
        ));
    }
    let (intercept, hedge_ratio, residuals) = ols(y, x)?;
    let critical_values = mackinnon_critical_values(n - 1);

    let y_mean = y.iter().sum::<f64>() / n as f64;
    let total: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let ssr: f64 = residuals.iter().map(|e| e * e).sum();
    if ssr <= f64::EPSILON * total.max(f64::MIN_POSITIVE) {
        // Exact linear relation: residuals carry no unit root.
        return Ok(CointegrationResult {
            statistic: f64::NEG_INFINITY,
            p_value: 0.0,
            critical_values,
            lags: 0,
            intercept,
            hedge_ratio,
            observations: n,
        });
    }

    let max_lag = max_lag.unwrap_or_else(|| default_max_lag(n));
    let (statistic, lags) = adf_statistic(&residuals, max_lag)?;
    Ok(CointegrationResult {
        statistic,
        p_value: mackinnon_p_value(statistic),
        critical_values,
        lags,
        intercept,
        hedge_ratio,
        observations: n,
    })
}
