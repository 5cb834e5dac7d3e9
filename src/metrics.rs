//! Performance and risk ratios over return series.
//!
//! Every function here is pure: same input, same output, no shared state.
//! Degenerate inputs (empty series, zero denominators) fail with
//! [`RiskError::Domain`] instead of returning a defaulted number.
//!
//! Dispersion conventions: Sharpe, Sortino, information ratio and
//! volatility use the population standard deviation; beta uses sample
//! covariance over sample variance.

use crate::error::{Result, RiskError};
use crate::utils::statistics::{mean, sample_covariance, sample_variance, std_dev};

/// Trading periods per year used for annualization.
pub const TRADING_PERIODS_PER_YEAR: f64 = 252.0;

pub(crate) fn require_non_empty(metric: &'static str, returns: &[f64]) -> Result<()> {
    if returns.is_empty() {
        return Err(RiskError::domain(metric, "returns series is empty", 0));
    }
    Ok(())
}

fn require_paired(metric: &'static str, returns: &[f64], benchmark: &[f64]) -> Result<()> {
    require_non_empty(metric, returns)?;
    if benchmark.is_empty() {
        return Err(RiskError::domain(metric, "benchmark series is empty", 0));
    }
    if returns.len() != benchmark.len() {
        return Err(RiskError::LengthMismatch {
            metric,
            left: returns.len(),
            right: benchmark.len(),
        });
    }
    Ok(())
}

/// Dispersion below this fraction of the data's mean magnitude is rounding
/// noise, not signal.
const RELATIVE_SPREAD_FLOOR: f64 = 1e-12;

/// Whether `spread` is zero relative to the magnitude of `values`. Depends
/// only on ratios, so scaling the data never changes the outcome.
pub(crate) fn is_degenerate(spread: f64, values: &[f64]) -> bool {
    let magnitude = values.iter().map(|v| v.abs()).sum::<f64>() / values.len().max(1) as f64;
    !(spread > RELATIVE_SPREAD_FLOOR * magnitude)
}

/// Mean excess return over its standard deviation.
pub fn sharpe_ratio(returns: &[f64], risk_free: f64) -> Result<f64> {
    require_non_empty("sharpe_ratio", returns)?;
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free).collect();
    let mu = mean(&excess);
    let sigma = std_dev(&excess);
    if is_degenerate(sigma, &excess) {
        return Err(RiskError::domain(
            "sharpe_ratio",
            "standard deviation of excess returns is zero",
            returns.len(),
        ));
    }
    Ok(mu / sigma)
}

/// Mean excess return over the spread of returns below `risk_free`.
pub fn sortino_ratio(returns: &[f64], risk_free: f64) -> Result<f64> {
    require_non_empty("sortino_ratio", returns)?;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < risk_free).collect();
    if downside.is_empty() {
        return Err(RiskError::domain(
            "sortino_ratio",
            "no returns below the risk-free rate",
            returns.len(),
        ));
    }
    let downside_risk = std_dev(&downside);
    if is_degenerate(downside_risk, &downside) {
        return Err(RiskError::domain(
            "sortino_ratio",
            "downside returns have zero spread",
            returns.len(),
        ));
    }
    Ok((mean(returns) - risk_free) / downside_risk)
}

/// Drawdown of the compounded curve from its running peak, per period.
///
/// The peak is the running maximum of the compounded curve itself, so a
/// loss in the first period does not register as a drawdown.
pub fn drawdown_series(returns: &[f64]) -> Result<Vec<f64>> {
    require_non_empty("drawdown_series", returns)?;
    let mut cumulative = 1.0;
    let mut peak = f64::NEG_INFINITY;
    Ok(returns
        .iter()
        .map(|r| {
            cumulative *= 1.0 + r;
            peak = peak.max(cumulative);
            cumulative / peak - 1.0
        })
        .collect())
}

/// Most negative drawdown. Always `<= 0`.
pub fn max_drawdown(returns: &[f64]) -> Result<f64> {
    let drawdowns = drawdown_series(returns)?;
    Ok(drawdowns.into_iter().fold(0.0, f64::min))
}

/// Periods from the last peak preceding the deepest trough to that trough.
pub fn drawdown_duration(returns: &[f64]) -> Result<usize> {
    let drawdowns = drawdown_series(returns)?;
    let (trough, depth) = drawdowns
        .iter()
        .copied()
        .enumerate()
        .fold((0, 0.0), |best, (i, d)| if d < best.1 { (i, d) } else { best });
    if depth == 0.0 {
        return Ok(0);
    }
    let peak = drawdowns[..trough]
        .iter()
        .rposition(|d| *d == 0.0)
        .unwrap_or(0);
    Ok(trough - peak)
}

/// Sensitivity to the benchmark: sample covariance over sample variance.
pub fn beta(returns: &[f64], benchmark: &[f64]) -> Result<f64> {
    require_paired("beta", returns, benchmark)?;
    if benchmark.len() < 2 {
        return Err(RiskError::domain(
            "beta",
            "need at least two observations",
            benchmark.len(),
        ));
    }
    let variance = sample_variance(benchmark);
    if is_degenerate(variance.sqrt(), benchmark) {
        return Err(RiskError::domain(
            "beta",
            "benchmark variance is zero",
            benchmark.len(),
        ));
    }
    Ok(sample_covariance(returns, benchmark) / variance)
}

/// Jensen's alpha: realised return less the CAPM-implied return.
pub fn alpha(beta: f64, portfolio_return: f64, benchmark_return: f64, risk_free: f64) -> f64 {
    portfolio_return - (risk_free + beta * (benchmark_return - risk_free))
}

/// Standard deviation of active returns against the benchmark.
pub fn tracking_error(returns: &[f64], benchmark: &[f64]) -> Result<f64> {
    require_paired("tracking_error", returns, benchmark)?;
    let active: Vec<f64> = returns.iter().zip(benchmark).map(|(r, b)| r - b).collect();
    Ok(std_dev(&active))
}

/// Mean active return over tracking error.
pub fn information_ratio(returns: &[f64], benchmark: &[f64]) -> Result<f64> {
    require_paired("information_ratio", returns, benchmark)?;
    let active: Vec<f64> = returns.iter().zip(benchmark).map(|(r, b)| r - b).collect();
    let active_mean = mean(&active);
    let te = std_dev(&active);
    if is_degenerate(te, &active) {
        return Err(RiskError::domain(
            "information_ratio",
            "tracking error is zero",
            returns.len(),
        ));
    }
    Ok(active_mean / te)
}

/// Annualized mean return over the magnitude of the maximum drawdown.
pub fn calmar_ratio(returns: &[f64], periods_per_year: f64) -> Result<f64> {
    require_non_empty("calmar_ratio", returns)?;
    let mdd = max_drawdown(returns)?;
    if mdd == 0.0 {
        return Err(RiskError::domain(
            "calmar_ratio",
            "maximum drawdown is zero",
            returns.len(),
        ));
    }
    Ok(mean(returns) * periods_per_year / mdd.abs())
}

/// Mean excess return per unit of systematic (beta) risk.
pub fn treynor_ratio(returns: &[f64], benchmark: &[f64], risk_free: f64) -> Result<f64> {
    let b = beta(returns, benchmark)?;
    if b == 0.0 {
        return Err(RiskError::domain("treynor_ratio", "beta is zero", returns.len()));
    }
    let excess = mean(returns) - risk_free;
    Ok(excess / b)
}

/// Per-period volatility (population standard deviation).
pub fn volatility(returns: &[f64]) -> Result<f64> {
    require_non_empty("volatility", returns)?;
    Ok(std_dev(returns))
}

/// Volatility scaled by `sqrt(periods_per_year)`.
pub fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> Result<f64> {
    if periods_per_year <= 0.0 {
        return Err(RiskError::invalid_parameter(
            "periods_per_year",
            periods_per_year,
            "must be positive",
        ));
    }
    Ok(volatility(returns)? * periods_per_year.sqrt())
}
