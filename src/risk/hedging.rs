//! Beta Hedging
//!
//! Sizes a benchmark hedge from the portfolio's beta. The hedge ratio is
//! `-β` benchmark units per unit of portfolio value: a negative ratio means
//! short the benchmark.

use crate::error::{Result, RiskError};
use crate::metrics;
use crate::utils::statistics::sample_variance;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Hedge sizing for one portfolio value and benchmark price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HedgeRecommendation {
    pub beta: f64,
    pub hedge_ratio: f64,
    pub portfolio_value: f64,
    pub benchmark_price: f64,
    /// Benchmark units to trade; negative = sell
    pub hedge_units: f64,
    /// Notional of the hedge leg in currency
    pub hedge_notional: f64,
}

pub struct BetaHedge {
    beta: f64,
    portfolio_returns: Vec<f64>,
    benchmark_returns: Vec<f64>,
    span: tracing::Span,
}

impl BetaHedge {
    /// Estimates beta from paired return series. Fails as [`metrics::beta`]
    /// does on mismatched lengths or a flat benchmark.
    pub fn new(portfolio_returns: &[f64], benchmark_returns: &[f64]) -> Result<Self> {
        let beta = metrics::beta(portfolio_returns, benchmark_returns)?;
        Ok(Self {
            beta,
            portfolio_returns: portfolio_returns.to_vec(),
            benchmark_returns: benchmark_returns.to_vec(),
            span: tracing::info_span!("beta_hedge"),
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        info!(parent: &span, beta = self.beta, "beta hedge estimated");
        self.span = span;
        self
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn hedge_ratio(&self) -> f64 {
        -self.beta
    }

    /// `hedge_ratio · portfolio_value / benchmark_price`.
    pub fn hedge_units(&self, portfolio_value: f64, benchmark_price: f64) -> Result<f64> {
        if !(benchmark_price > 0.0) || !benchmark_price.is_finite() {
            return Err(RiskError::invalid_parameter(
                "benchmark_price",
                benchmark_price,
                "must be positive and finite",
            ));
        }
        if !portfolio_value.is_finite() {
            return Err(RiskError::invalid_parameter(
                "portfolio_value",
                portfolio_value,
                "must be finite",
            ));
        }
        Ok(self.hedge_ratio() * portfolio_value / benchmark_price)
    }

    pub fn recommend(&self, portfolio_value: f64, benchmark_price: f64) -> Result<HedgeRecommendation> {
        let hedge_units = self.hedge_units(portfolio_value, benchmark_price)?;
        let recommendation = HedgeRecommendation {
            beta: self.beta,
            hedge_ratio: self.hedge_ratio(),
            portfolio_value,
            benchmark_price,
            hedge_units,
            hedge_notional: hedge_units * benchmark_price,
        };
        info!(
            parent: &self.span,
            beta = self.beta,
            hedge_units,
            portfolio_value,
            benchmark_price,
            "hedge sized"
        );
        Ok(recommendation)
    }

    /// Per-period returns of the portfolio with the hedge leg on:
    /// `r_p + hedge_ratio · r_b`.
    pub fn hedged_returns(&self) -> Vec<f64> {
        let ratio = self.hedge_ratio();
        self.portfolio_returns
            .iter()
            .zip(&self.benchmark_returns)
            .map(|(p, b)| p + ratio * b)
            .collect()
    }

    /// Fraction of portfolio variance removed by the hedge, floored at 0.
    pub fn hedge_effectiveness(&self) -> f64 {
        let unhedged = sample_variance(&self.portfolio_returns);
        if unhedged <= 0.0 {
            return 0.0;
        }
        let hedged = sample_variance(&self.hedged_returns());
        ((unhedged - hedged) / unhedged).max(0.0)
    }
}
