//! Transaction cost analysis
//!
//! Commission, slippage and taxes are each a rate on traded notional
//! `|quantity| · price`.

use super::{AssetId, TradeRequest};
use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostRates {
    pub commission: f64,
    pub slippage: f64,
    pub taxes: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            commission: 0.001,
            slippage: 0.0005,
            taxes: 0.002,
        }
    }
}

impl CostRates {
    pub fn total(&self) -> f64 {
        self.commission + self.slippage + self.taxes
    }

    fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("commission", self.commission),
            ("slippage", self.slippage),
            ("taxes", self.taxes),
        ] {
            if !(rate.is_finite() && rate >= 0.0) {
                return Err(RiskError::invalid_parameter(name, rate, "must be non-negative and finite"));
            }
        }
        Ok(())
    }
}

/// An executed trade. Positive quantity buys, negative sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub asset: AssetId,
    pub quantity: f64,
    pub price: f64,
}

impl Fill {
    pub fn new(asset: impl Into<AssetId>, quantity: f64, price: f64) -> Self {
        Self {
            asset: asset.into(),
            quantity,
            price,
        }
    }

    pub fn from_request(request: &TradeRequest, price: f64) -> Self {
        Self::new(request.asset.clone(), request.quantity, price)
    }

    pub fn notional(&self) -> f64 {
        self.quantity.abs() * self.price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCost {
    pub asset: AssetId,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub slippage: f64,
    pub taxes: f64,
    pub total_cost: f64,
    /// Price less the per-unit cost
    pub net_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub trades: Vec<TradeCost>,
    pub commission: f64,
    pub slippage: f64,
    pub taxes: f64,
    pub total_cost: f64,
}

pub struct TransactionCostAnalyzer {
    rates: CostRates,
    span: tracing::Span,
}

impl TransactionCostAnalyzer {
    pub fn new(rates: CostRates) -> Result<Self> {
        rates.validate()?;
        Ok(Self {
            rates,
            span: tracing::info_span!("transaction_costs"),
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn rates(&self) -> &CostRates {
        &self.rates
    }

    pub fn cost_of(&self, fill: &Fill) -> Result<TradeCost> {
        if !(fill.quantity.is_finite() && fill.quantity != 0.0) {
            return Err(RiskError::InvalidInput(format!(
                "fill quantity for {} must be finite and non-zero",
                fill.asset
            )));
        }
        if !(fill.price.is_finite() && fill.price > 0.0) {
            return Err(RiskError::invalid_parameter("price", fill.price, "must be positive and finite"));
        }
        let notional = fill.notional();
        let commission = notional * self.rates.commission;
        let slippage = notional * self.rates.slippage;
        let taxes = notional * self.rates.taxes;
        let total_cost = commission + slippage + taxes;
        Ok(TradeCost {
            asset: fill.asset.clone(),
            quantity: fill.quantity,
            price: fill.price,
            commission,
            slippage,
            taxes,
            total_cost,
            net_price: fill.price - total_cost / fill.quantity.abs(),
        })
    }

    /// Per-trade costs and their totals by component.
    pub fn analyze(&self, fills: &[Fill]) -> Result<CostSummary> {
        let trades = fills.iter().map(|f| self.cost_of(f)).collect::<Result<Vec<_>>>()?;
        for trade in &trades {
            debug!(parent: &self.span, asset = %trade.asset, total_cost = trade.total_cost, net_price = trade.net_price, "trade cost");
        }
        let summary = CostSummary {
            commission: trades.iter().map(|t| t.commission).sum(),
            slippage: trades.iter().map(|t| t.slippage).sum(),
            taxes: trades.iter().map(|t| t.taxes).sum(),
            total_cost: trades.iter().map(|t| t.total_cost).sum(),
            trades,
        };
        info!(
            parent: &self.span,
            trades = summary.trades.len(),
            commission = summary.commission,
            slippage = summary.slippage,
            taxes = summary.taxes,
            total_cost = summary.total_cost,
            "transaction costs computed"
        );
        Ok(summary)
    }
}
