//! Risk Management Module
//!
//! This module provides the risk side of the engine:
//! - Value-at-Risk and expected shortfall
//! - A metrics engine bound to one return series
//! - Rate, position and trade-count gates for proposed trades
//! - Maximum-Sharpe portfolio optimization
//! - Scenario stress testing, hedging, diversification and position sizing
//! - Rebalancing trades, stop-loss exits and transaction costs

pub mod constraints;
pub mod diversification;
pub mod hedging;
pub mod metrics_engine;
pub mod portfolio_optimization;
pub mod position_sizing;
pub mod rebalancing;
pub mod scenario;
pub mod stop_loss;
pub mod throttle;
pub mod trade_limits;
pub mod transaction_costs;
pub mod var_calculator;

pub use constraints::*;
pub use diversification::*;
pub use hedging::*;
pub use metrics_engine::*;
pub use portfolio_optimization::*;
pub use position_sizing::*;
pub use rebalancing::*;
pub use scenario::*;
pub use stop_loss::*;
pub use throttle::*;
pub use trade_limits::*;
pub use transaction_costs::*;
pub use var_calculator::*;

use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Asset identifier
pub type AssetId = String;

/// Risk factor name to threshold. Read-only for the duration of a check.
pub type RiskLimits = BTreeMap<String, f64>;

/// Snapshot of current position values per asset. Serialized as a plain
/// asset-to-value map; deserialization goes through [`Portfolio::new`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<AssetId, f64>", into = "BTreeMap<AssetId, f64>")]
pub struct Portfolio {
    values: BTreeMap<AssetId, f64>,
}

impl Portfolio {
    pub fn new(values: BTreeMap<AssetId, f64>) -> Result<Self> {
        if let Some((asset, value)) = values.iter().find(|(_, v)| !(v.is_finite() && **v >= 0.0)) {
            return Err(RiskError::InvalidInput(format!(
                "position value for {asset} must be finite and non-negative, got {value}"
            )));
        }
        Ok(Self { values })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<AssetId>,
    {
        Self::new(pairs.into_iter().map(|(a, v)| (a.into(), v)).collect())
    }

    pub fn value(&self, asset: &str) -> Option<f64> {
        self.values.get(asset).copied()
    }

    pub fn values(&self) -> &BTreeMap<AssetId, f64> {
        &self.values
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn total_value(&self) -> f64 {
        self.values.values().sum()
    }

    /// Value share per asset, summing to one.
    pub fn weights(&self) -> Result<BTreeMap<AssetId, f64>> {
        let total = self.total_value();
        if total <= 0.0 {
            return Err(RiskError::domain(
                "Portfolio::weights",
                "total portfolio value is zero",
                self.values.len(),
            ));
        }
        Ok(self
            .values
            .iter()
            .map(|(asset, value)| (asset.clone(), value / total))
            .collect())
    }
}

impl TryFrom<BTreeMap<AssetId, f64>> for Portfolio {
    type Error = RiskError;

    fn try_from(values: BTreeMap<AssetId, f64>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<Portfolio> for BTreeMap<AssetId, f64> {
    fn from(portfolio: Portfolio) -> Self {
        portfolio.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_portfolio_deserialization_is_validated() {
        let portfolio: Portfolio = serde_json::from_str(r#"{"AssetA": 300000.0, "AssetB": 100000.0}"#).unwrap();
        assert_relative_eq!(portfolio.total_value(), 400_000.0);
        assert_eq!(
            serde_json::to_string(&portfolio).unwrap(),
            r#"{"AssetA":300000.0,"AssetB":100000.0}"#
        );

        let negative = serde_json::from_str::<Portfolio>(r#"{"AssetA": -5.0}"#).unwrap_err();
        assert!(negative.to_string().contains("non-negative"), "{negative}");
    }

    #[test]
    fn test_portfolio_weights() {
        let portfolio = Portfolio::from_pairs([("AssetA", 300_000.0), ("AssetB", 100_000.0)]).unwrap();
        assert_relative_eq!(portfolio.total_value(), 400_000.0);
        let weights = portfolio.weights().unwrap();
        assert_relative_eq!(weights["AssetA"], 0.75);
        assert_relative_eq!(weights.values().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_portfolio_rejects_negative_values() {
        assert!(matches!(
            Portfolio::from_pairs([("AssetA", -1.0)]),
            Err(RiskError::InvalidInput(_))
        ));
        assert!(Portfolio::from_pairs([("AssetA", f64::NAN)]).is_err());
    }

    #[test]
    fn test_empty_portfolio_has_no_weights() {
        let portfolio = Portfolio::default();
        assert!(matches!(portfolio.weights(), Err(RiskError::Domain { .. })));
    }
}
