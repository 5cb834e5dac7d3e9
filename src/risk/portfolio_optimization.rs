//! Portfolio Optimization
//!
//! Long-only maximum-Sharpe weights:
//! maximize `(w·μ·f − rf) / sqrt(wᵀ(Σ·f)w)` subject to `Σw = 1`, `0 ≤ w ≤ 1`,
//! solved by projected-gradient ascent on the simplex from equal weights.

use crate::error::{Result, RiskError};
use crate::math::optimization::{OptimizationType, ProjectedGradientOptimizer};
use crate::metrics::TRADING_PERIODS_PER_YEAR;
use crate::risk::AssetId;
use crate::series::ReturnsMatrix;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Annualization, risk-free rate and solver controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub periods_per_year: f64,
    /// Annual risk-free rate
    pub risk_free_rate: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub learning_rate: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        let solver = ProjectedGradientOptimizer::default();
        Self {
            periods_per_year: TRADING_PERIODS_PER_YEAR,
            risk_free_rate: 0.0,
            max_iterations: solver.max_iterations,
            tolerance: solver.tolerance,
            learning_rate: solver.learning_rate,
        }
    }
}

/// Optimal weights with their annualized characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPortfolio {
    pub weights: BTreeMap<AssetId, f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub iterations: usize,
}

impl OptimizedPortfolio {
    /// Equal weights, for callers that fall back after a failed optimization.
    pub fn equal_weight(returns: &ReturnsMatrix, settings: &OptimizerSettings) -> Result<Self> {
        let inputs = AnnualizedInputs::new(returns, settings)?;
        let k = returns.assets().len();
        let weights = DVector::from_element(k, 1.0 / k as f64);
        inputs.portfolio(returns.assets(), &weights, 0)
    }
}

struct AnnualizedInputs {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    risk_free_rate: f64,
}

impl AnnualizedInputs {
    fn new(returns: &ReturnsMatrix, settings: &OptimizerSettings) -> Result<Self> {
        let k = returns.assets().len();
        if k == 0 {
            return Err(RiskError::domain("PortfolioOptimizer", "no assets", 0));
        }
        if returns.periods() < 2 {
            return Err(RiskError::domain(
                "PortfolioOptimizer",
                "need at least two periods for a covariance",
                returns.periods(),
            ));
        }
        let f = settings.periods_per_year;
        Ok(Self {
            mean: returns.mean_returns() * f,
            covariance: returns.covariance() * f,
            risk_free_rate: settings.risk_free_rate,
        })
    }

    fn variance(&self, w: &DVector<f64>) -> f64 {
        w.dot(&(&self.covariance * w))
    }

    fn sharpe(&self, w: &DVector<f64>) -> f64 {
        let variance = self.variance(w);
        if variance <= 0.0 {
            return f64::NAN;
        }
        (w.dot(&self.mean) - self.risk_free_rate) / variance.sqrt()
    }

    /// ∇S = μ/v − r·(Σw)/v³ with r = w·μ − rf and v = sqrt(wᵀΣw).
    fn sharpe_gradient(&self, w: &DVector<f64>) -> DVector<f64> {
        let sigma_w = &self.covariance * w;
        let variance = w.dot(&sigma_w);
        if variance <= 0.0 {
            return DVector::from_element(w.len(), f64::NAN);
        }
        let v = variance.sqrt();
        let excess = w.dot(&self.mean) - self.risk_free_rate;
        &self.mean / v - sigma_w * (excess / (v * variance))
    }

    fn portfolio(&self, assets: &[AssetId], w: &DVector<f64>, iterations: usize) -> Result<OptimizedPortfolio> {
        let variance = self.variance(w);
        if !(variance > 0.0) {
            return Err(RiskError::domain(
                "OptimizedPortfolio",
                "portfolio variance is zero",
                assets.len(),
            ));
        }
        let expected_return = w.dot(&self.mean);
        let volatility = variance.sqrt();
        Ok(OptimizedPortfolio {
            weights: assets.iter().cloned().zip(w.iter().copied()).collect(),
            expected_return,
            volatility,
            sharpe_ratio: (expected_return - self.risk_free_rate) / volatility,
            iterations,
        })
    }
}

pub struct PortfolioOptimizer {
    settings: OptimizerSettings,
    solver: ProjectedGradientOptimizer,
    span: tracing::Span,
}

impl PortfolioOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        let solver = ProjectedGradientOptimizer::new(
            settings.learning_rate,
            settings.max_iterations,
            settings.tolerance,
        );
        Self {
            settings,
            solver,
            span: tracing::info_span!("portfolio_optimizer"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Maximum-Sharpe weights. Fails with [`RiskError::Optimization`] when
    /// the solver does not converge or the objective is not finite; the
    /// caller decides whether to fall back to
    /// [`OptimizedPortfolio::equal_weight`].
    pub fn optimize(&self, returns: &ReturnsMatrix) -> Result<OptimizedPortfolio> {
        let inputs = AnnualizedInputs::new(returns, &self.settings)?;
        let k = returns.assets().len();
        let initial = DVector::from_element(k, 1.0 / k as f64);

        let result = self.solver.optimize(
            |w| inputs.sharpe(w),
            |w| inputs.sharpe_gradient(w),
            &initial,
            OptimizationType::Maximize,
        );

        if !result.objective_value.is_finite() || !result.converged {
            let reason = if result.objective_value.is_finite() {
                format!("did not converge within {} iterations", self.settings.max_iterations)
            } else {
                "objective is not finite (zero portfolio variance)".to_string()
            };
            warn!(parent: &self.span, assets = k, iterations = result.iterations, %reason, "optimization failed");
            return Err(RiskError::Optimization {
                reason,
                assets: k,
                iterations: result.iterations,
            });
        }

        let portfolio = inputs.portfolio(returns.assets(), &result.solution, result.iterations)?;
        info!(
            parent: &self.span,
            assets = k,
            iterations = result.iterations,
            sharpe = portfolio.sharpe_ratio,
            "optimization converged"
        );
        Ok(portfolio)
    }
}
