//! Value-at-Risk (VaR) Calculator
//!
//! This module implements the three VaR methods as independent operations:
//! - Historical simulation: empirical quantile at `1 - confidence`
//! - Parametric: `mean - z(confidence) * std` under a normal assumption
//! - Monte Carlo: bootstrap resampling of whole paths, quantile of path sums
//!
//! plus Conditional VaR (expected shortfall). VaR values are return
//! quantiles, so a loss is reported as a negative number.

use crate::error::{Result, RiskError};
use crate::metrics::require_non_empty;
use crate::utils::statistics::{mean, percentile_sorted, sample_std_dev};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Default number of simulated paths for Monte Carlo VaR
pub const DEFAULT_SIMULATIONS: usize = 10_000;

/// Confidence levels for VaR calculations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    /// 95% confidence level (α = 0.05)
    Percent95,
    /// 99% confidence level (α = 0.01)
    Percent99,
    /// 99.9% confidence level (α = 0.001)
    Percent999,
    /// Custom confidence level in (0, 1)
    Custom(f64),
}

impl ConfidenceLevel {
    pub fn confidence(&self) -> f64 {
        match self {
            ConfidenceLevel::Percent95 => 0.95,
            ConfidenceLevel::Percent99 => 0.99,
            ConfidenceLevel::Percent999 => 0.999,
            ConfidenceLevel::Custom(c) => *c,
        }
    }

    /// Tail probability `1 - confidence`
    pub fn alpha(&self) -> f64 {
        1.0 - self.confidence()
    }
}

impl From<f64> for ConfidenceLevel {
    fn from(confidence: f64) -> Self {
        ConfidenceLevel::Custom(confidence)
    }
}

/// VaR calculation methods
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VaRMethod {
    /// Historical simulation using the empirical distribution
    Historical,
    /// Parametric VaR assuming normally distributed returns
    Parametric,
    /// Bootstrap Monte Carlo over whole paths
    MonteCarlo { simulations: usize, seed: u64 },
}

impl VaRMethod {
    pub fn monte_carlo(seed: u64) -> Self {
        VaRMethod::MonteCarlo {
            simulations: DEFAULT_SIMULATIONS,
            seed,
        }
    }
}

/// VaR calculation results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaRResult {
    /// Return quantile at `1 - confidence` (negative = loss)
    pub var: f64,
    /// Mean outcome beyond the VaR threshold
    pub expected_shortfall: f64,
    /// Confidence level used
    pub confidence: f64,
    /// Method used for calculation
    pub method: VaRMethod,
    /// Number of observations used
    pub sample_size: usize,
}

fn validate_confidence(confidence: f64) -> Result<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(RiskError::invalid_parameter(
            "confidence",
            confidence,
            "must lie strictly between 0 and 1",
        ));
    }
    Ok(())
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

fn tail_mean(values: &[f64], threshold: f64) -> f64 {
    let tail: Vec<f64> = values.iter().copied().filter(|v| *v <= threshold).collect();
    mean(&tail)
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| RiskError::InvalidInput(e.to_string()))
}

/// Historical simulation VaR: empirical quantile at `1 - confidence`.
pub fn historical_var(returns: &[f64], confidence: f64) -> Result<f64> {
    require_non_empty("historical_var", returns)?;
    validate_confidence(confidence)?;
    Ok(percentile_sorted(&sorted(returns), 1.0 - confidence))
}

/// Parametric VaR: `mean - z(confidence) * std` with sample std.
pub fn parametric_var(returns: &[f64], confidence: f64) -> Result<f64> {
    validate_confidence(confidence)?;
    if returns.len() < 2 {
        return Err(RiskError::domain(
            "parametric_var",
            "need at least two observations for a standard deviation",
            returns.len(),
        ));
    }
    let z = standard_normal()?.inverse_cdf(confidence);
    Ok(mean(returns) - z * sample_std_dev(returns))
}

/// Simulated path sums: each path resamples `returns.len()` returns with
/// replacement. Deterministic for a given seed.
fn simulate_path_sums(returns: &[f64], simulations: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = returns.len();
    (0..simulations)
        .map(|_| (0..n).map(|_| returns[rng.gen_range(0..n)]).sum())
        .collect()
}

/// Monte Carlo VaR over the horizon of the input series.
pub fn monte_carlo_var(
    returns: &[f64],
    confidence: f64,
    simulations: usize,
    seed: u64,
) -> Result<f64> {
    require_non_empty("monte_carlo_var", returns)?;
    validate_confidence(confidence)?;
    if simulations == 0 {
        return Err(RiskError::invalid_parameter(
            "simulations",
            simulations,
            "must be at least 1",
        ));
    }
    let paths = sorted(&simulate_path_sums(returns, simulations, seed));
    Ok(percentile_sorted(&paths, 1.0 - confidence))
}

/// Conditional VaR: mean of all returns at or below the historical VaR.
pub fn conditional_value_at_risk(returns: &[f64], confidence: f64) -> Result<f64> {
    let threshold = historical_var(returns, confidence)?;
    Ok(tail_mean(returns, threshold))
}

/// Dispatch to one VaR method and bundle the matching expected shortfall.
pub fn value_at_risk(returns: &[f64], confidence: f64, method: VaRMethod) -> Result<VaRResult> {
    let (var, expected_shortfall) = match method {
        VaRMethod::Historical => {
            let var = historical_var(returns, confidence)?;
            (var, tail_mean(returns, var))
        }
        VaRMethod::Parametric => {
            let var = parametric_var(returns, confidence)?;
            let normal = standard_normal()?;
            let z = normal.inverse_cdf(confidence);
            // Normal tail mean: mu - sigma * phi(z) / (1 - c)
            let es = mean(returns) - sample_std_dev(returns) * normal.pdf(z) / (1.0 - confidence);
            (var, es)
        }
        VaRMethod::MonteCarlo { simulations, seed } => {
            let var = monte_carlo_var(returns, confidence, simulations, seed)?;
            let paths = simulate_path_sums(returns, simulations, seed);
            (var, tail_mean(&paths, var))
        }
    };

    Ok(VaRResult {
        var,
        expected_shortfall,
        confidence,
        method,
        sample_size: returns.len(),
    })
}
