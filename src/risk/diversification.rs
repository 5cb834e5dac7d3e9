//! Diversification metrics and inverse-volatility (risk parity) weights.

use super::{AssetId, Portfolio};
use crate::error::{Result, RiskError};
use crate::series::ReturnsMatrix;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Sum of squared weights: 1/n for an equal-weight book, 1 for a single asset.
pub fn herfindahl_index(portfolio: &Portfolio) -> Result<f64> {
    Ok(portfolio.weights()?.values().map(|w| w * w).sum())
}

/// `-Σ w ln w` over non-zero weights; `ln n` at most.
pub fn shannon_entropy(portfolio: &Portfolio) -> Result<f64> {
    Ok(-portfolio
        .weights()?
        .values()
        .filter(|w| **w > 0.0)
        .map(|w| w * w.ln())
        .sum::<f64>())
}

/// Weighted average asset volatility over portfolio volatility. Equals 1
/// for perfectly correlated assets and grows as correlation falls.
pub fn diversification_ratio(weights: &DVector<f64>, covariance: &DMatrix<f64>) -> Result<f64> {
    if !covariance.is_square() || covariance.nrows() != weights.len() {
        return Err(RiskError::LengthMismatch {
            metric: "diversification_ratio",
            left: weights.len(),
            right: covariance.nrows(),
        });
    }
    let portfolio_variance = weights.dot(&(covariance * weights));
    if !(portfolio_variance > 0.0) {
        return Err(RiskError::domain(
            "diversification_ratio",
            "portfolio variance is zero",
            weights.len(),
        ));
    }
    let weighted_vol: f64 = weights
        .iter()
        .zip(covariance.diagonal().iter())
        .map(|(w, var)| w * var.max(0.0).sqrt())
        .sum();
    Ok(weighted_vol / portfolio_variance.sqrt())
}

/// Weights proportional to `1/σ_i`, normalized to one. Every asset needs a
/// positive variance.
pub fn inverse_volatility_weights(covariance: &DMatrix<f64>) -> Result<DVector<f64>> {
    if !covariance.is_square() || covariance.nrows() == 0 {
        return Err(RiskError::domain(
            "inverse_volatility_weights",
            "covariance must be a non-empty square matrix",
            covariance.nrows(),
        ));
    }
    let diagonal = covariance.diagonal();
    if let Some(i) = diagonal.iter().position(|v| !(*v > 0.0)) {
        return Err(RiskError::domain(
            "inverse_volatility_weights",
            format!("asset {i} has zero variance"),
            covariance.nrows(),
        ));
    }
    let inverse = diagonal.map(|v| 1.0 / v.sqrt());
    let total = inverse.sum();
    Ok(inverse / total)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversificationReport {
    pub herfindahl_index: f64,
    /// `1 / HHI`
    pub effective_assets: f64,
    pub shannon_entropy: f64,
    /// Present when returns were supplied for every held asset
    pub diversification_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParityAllocation {
    pub weights: BTreeMap<AssetId, f64>,
    /// Per-period volatility of the allocation
    pub volatility: f64,
}

pub struct DiversificationAnalyzer {
    span: tracing::Span,
}

impl Default for DiversificationAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl DiversificationAnalyzer {
    pub fn new() -> Self {
        Self {
            span: tracing::info_span!("diversification"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Concentration metrics of the snapshot, plus the diversification ratio
    /// when `returns` covers every held asset.
    pub fn assess(&self, portfolio: &Portfolio, returns: Option<&ReturnsMatrix>) -> Result<DiversificationReport> {
        let hhi = herfindahl_index(portfolio)?;
        let entropy = shannon_entropy(portfolio)?;
        let ratio = match returns {
            Some(returns) => Some(self.portfolio_ratio(portfolio, returns)?),
            None => None,
        };
        let report = DiversificationReport {
            herfindahl_index: hhi,
            effective_assets: 1.0 / hhi,
            shannon_entropy: entropy,
            diversification_ratio: ratio,
        };
        info!(
            parent: &self.span,
            hhi,
            entropy,
            ratio = ?report.diversification_ratio,
            "diversification assessed"
        );
        Ok(report)
    }

    fn portfolio_ratio(&self, portfolio: &Portfolio, returns: &ReturnsMatrix) -> Result<f64> {
        let weights = portfolio.weights()?;
        if let Some(missing) = weights.keys().find(|a| !returns.assets().contains(a)) {
            return Err(RiskError::MissingColumn {
                column: missing.clone(),
                available: returns.assets().to_vec(),
            });
        }
        let w = DVector::from_iterator(
            returns.assets().len(),
            returns
                .assets()
                .iter()
                .map(|a| weights.get(a).copied().unwrap_or(0.0)),
        );
        diversification_ratio(&w, &returns.covariance())
    }

    pub fn risk_parity(&self, returns: &ReturnsMatrix) -> Result<RiskParityAllocation> {
        if returns.periods() < 2 {
            return Err(RiskError::domain(
                "risk_parity",
                "need at least two periods for a covariance",
                returns.periods(),
            ));
        }
        let covariance = returns.covariance();
        let w = inverse_volatility_weights(&covariance)?;
        let volatility = w.dot(&(&covariance * &w)).sqrt();
        info!(parent: &self.span, assets = w.len(), volatility, "risk parity weights");
        Ok(RiskParityAllocation {
            weights: returns.assets().iter().cloned().zip(w.iter().copied()).collect(),
            volatility,
        })
    }
}
