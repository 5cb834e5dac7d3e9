//! Position Sizing
//!
//! Fixed-fractional sizing from a stop-loss distance, and a Kelly
//! fraction `f* = (μ - r) / (γ σ²)` with a fractional multiplier and a cap.

use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Sizes trades so that hitting the stop loses `risk_per_trade · account_size`.
pub struct PositionSizer {
    risk_per_trade: f64,
    account_size: f64,
    span: tracing::Span,
}

impl PositionSizer {
    /// `risk_per_trade` is a fraction of the account in (0, 1].
    pub fn new(risk_per_trade: f64, account_size: f64) -> Result<Self> {
        if !(risk_per_trade > 0.0 && risk_per_trade <= 1.0) {
            return Err(RiskError::invalid_parameter(
                "risk_per_trade",
                risk_per_trade,
                "must lie in (0, 1]",
            ));
        }
        if !(account_size > 0.0) || !account_size.is_finite() {
            return Err(RiskError::invalid_parameter(
                "account_size",
                account_size,
                "must be positive and finite",
            ));
        }
        Ok(Self {
            risk_per_trade,
            account_size,
            span: tracing::info_span!("position_sizer"),
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn risk_per_trade(&self) -> f64 {
        self.risk_per_trade
    }

    pub fn account_size(&self) -> f64 {
        self.account_size
    }

    /// Capital at risk on one trade.
    pub fn risk_amount(&self) -> f64 {
        self.risk_per_trade * self.account_size
    }

    /// Units such that a loss of `stop_loss_amount` per unit costs
    /// [`Self::risk_amount`].
    pub fn calculate_position_size(&self, stop_loss_amount: f64) -> Result<f64> {
        if !(stop_loss_amount > 0.0) || !stop_loss_amount.is_finite() {
            return Err(RiskError::invalid_parameter(
                "stop_loss_amount",
                stop_loss_amount,
                "must be positive and finite",
            ));
        }
        let size = self.risk_amount() / stop_loss_amount;
        info!(parent: &self.span, size, stop_loss_amount, "position sized");
        Ok(size)
    }

    /// Whether the position's notional fits in the account.
    pub fn assess_position_size(&self, position_size: f64, asset_price: f64) -> bool {
        let notional = position_size * asset_price;
        let fits = notional <= self.account_size;
        if fits {
            info!(parent: &self.span, position_size, asset_price, "position size acceptable");
        } else {
            warn!(
                parent: &self.span,
                position_size,
                asset_price,
                notional,
                account_size = self.account_size,
                "position size exceeds account"
            );
        }
        fits
    }
}

/// Kelly sizing controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KellySettings {
    pub risk_aversion: f64,
    /// Multiplier applied to the full Kelly fraction
    pub fractional_kelly: f64,
    /// Absolute cap on the resulting fraction
    pub max_position_fraction: f64,
}

impl Default for KellySettings {
    fn default() -> Self {
        Self {
            risk_aversion: 2.0,
            fractional_kelly: 0.5,
            max_position_fraction: 0.25,
        }
    }
}

/// Full Kelly fraction `(μ - r) / (γ σ²)`.
pub fn kelly_fraction(expected_return: f64, volatility: f64, risk_free: f64, risk_aversion: f64) -> Result<f64> {
    if !(volatility > 0.0) {
        return Err(RiskError::invalid_parameter(
            "volatility",
            volatility,
            "must be positive",
        ));
    }
    if !(risk_aversion > 0.0) {
        return Err(RiskError::invalid_parameter(
            "risk_aversion",
            risk_aversion,
            "must be positive",
        ));
    }
    Ok((expected_return - risk_free) / (risk_aversion * volatility * volatility))
}

/// Kelly fraction scaled by `fractional_kelly` and clamped to
/// `±max_position_fraction`.
pub fn fractional_kelly(expected_return: f64, volatility: f64, risk_free: f64, settings: &KellySettings) -> Result<f64> {
    let full = kelly_fraction(expected_return, volatility, risk_free, settings.risk_aversion)?;
    let cap = settings.max_position_fraction.abs();
    Ok((full * settings.fractional_kelly).clamp(-cap, cap))
}
