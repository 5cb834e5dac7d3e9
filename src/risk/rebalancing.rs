//! Rebalancing a portfolio snapshot towards target weights.
//!
//! Trade values are `target_weight · total_value − current_value`, positive
//! to buy. Held assets missing from the targets are sold down to zero;
//! targeted assets not yet held are bought from zero.

use super::{AssetId, OptimizedPortfolio, Portfolio, TradeRequest};
use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Tolerance on the sum of target weights.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceTrade {
    pub asset: AssetId,
    pub current_value: f64,
    pub current_weight: f64,
    pub target_weight: f64,
    pub target_value: f64,
    /// Positive = buy, negative = sell
    pub trade_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub total_value: f64,
    pub trades: Vec<RebalanceTrade>,
}

impl RebalancePlan {
    pub fn trade(&self, asset: &str) -> Option<&RebalanceTrade> {
        self.trades.iter().find(|t| t.asset == asset)
    }

    /// One-way turnover as a fraction of the portfolio value.
    pub fn turnover(&self) -> f64 {
        if self.total_value <= 0.0 {
            return 0.0;
        }
        self.trades.iter().map(|t| t.trade_value.abs()).sum::<f64>() / (2.0 * self.total_value)
    }

    /// The snapshot after every trade has executed at current values.
    pub fn rebalanced(&self) -> Result<Portfolio> {
        Portfolio::new(
            self.trades
                .iter()
                .map(|t| (t.asset.clone(), t.target_value))
                .collect(),
        )
    }

    /// Convert trade values into gate requests at `prices`, skipping trades
    /// smaller than `min_trade_value` in absolute value.
    pub fn trade_requests(&self, prices: &BTreeMap<AssetId, f64>, min_trade_value: f64) -> Result<Vec<TradeRequest>> {
        let mut requests = Vec::new();
        for trade in &self.trades {
            if trade.trade_value == 0.0 || trade.trade_value.abs() < min_trade_value {
                continue;
            }
            let price = prices.get(&trade.asset).copied().ok_or_else(|| {
                RiskError::InvalidInput(format!("no price for {} to size its rebalance trade", trade.asset))
            })?;
            if !(price.is_finite() && price > 0.0) {
                return Err(RiskError::invalid_parameter("price", price, "must be positive and finite"));
            }
            requests.push(TradeRequest::new(trade.asset.clone(), trade.trade_value / price));
        }
        Ok(requests)
    }
}

pub struct PortfolioRebalancer {
    span: tracing::Span,
}

impl Default for PortfolioRebalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl PortfolioRebalancer {
    pub fn new() -> Self {
        Self {
            span: tracing::info_span!("portfolio_rebalancer"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Trades that move `portfolio` to `targets`. Targets must be finite,
    /// within `[0, 1]` and sum to one.
    pub fn plan(&self, portfolio: &Portfolio, targets: &BTreeMap<AssetId, f64>) -> Result<RebalancePlan> {
        validate_targets(targets)?;
        let current = portfolio.weights()?;
        let total_value = portfolio.total_value();

        let mut assets: Vec<&AssetId> = portfolio.assets().chain(targets.keys()).collect();
        assets.sort();
        assets.dedup();

        let trades: Vec<RebalanceTrade> = assets
            .into_iter()
            .map(|asset| {
                let current_value = portfolio.value(asset).unwrap_or(0.0);
                let target_weight = targets.get(asset).copied().unwrap_or(0.0);
                let target_value = target_weight * total_value;
                RebalanceTrade {
                    asset: asset.clone(),
                    current_value,
                    current_weight: current.get(asset).copied().unwrap_or(0.0),
                    target_weight,
                    target_value,
                    trade_value: target_value - current_value,
                }
            })
            .collect();

        for trade in trades.iter().filter(|t| t.trade_value != 0.0) {
            debug!(parent: &self.span, asset = %trade.asset, trade_value = trade.trade_value, "rebalance trade");
        }
        let plan = RebalancePlan { total_value, trades };
        info!(parent: &self.span, total_value, turnover = plan.turnover(), "rebalance planned");
        Ok(plan)
    }

    /// Rebalance towards an optimizer's weights.
    pub fn plan_from_optimized(&self, portfolio: &Portfolio, optimized: &OptimizedPortfolio) -> Result<RebalancePlan> {
        self.plan(portfolio, &optimized.weights)
    }
}

fn validate_targets(targets: &BTreeMap<AssetId, f64>) -> Result<()> {
    if let Some((asset, weight)) = targets
        .iter()
        .find(|(_, w)| !(w.is_finite() && (0.0..=1.0).contains(*w)))
    {
        return Err(RiskError::InvalidInput(format!(
            "target weight for {asset} must lie in [0, 1], got {weight}"
        )));
    }
    let sum: f64 = targets.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(RiskError::invalid_parameter("target_weights", sum, "must sum to 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn book() -> Portfolio {
        Portfolio::from_pairs([
            ("Asset_A", 300_000.0),
            ("Asset_B", 200_000.0),
            ("Asset_C", 150_000.0),
            ("Asset_D", 250_000.0),
            ("Asset_E", 100_000.0),
        ])
        .unwrap()
    }

    fn targets(pairs: &[(&str, f64)]) -> BTreeMap<AssetId, f64> {
        pairs.iter().map(|(a, w)| (a.to_string(), *w)).collect()
    }

    #[test]
    fn test_trade_values_reach_targets() {
        let targets = targets(&[
            ("Asset_A", 0.2),
            ("Asset_B", 0.3),
            ("Asset_C", 0.2),
            ("Asset_D", 0.2),
            ("Asset_E", 0.1),
        ]);
        let plan = PortfolioRebalancer::new().plan(&book(), &targets).unwrap();

        assert_relative_eq!(plan.trade("Asset_A").unwrap().trade_value, -100_000.0, epsilon = 1e-6);
        assert_relative_eq!(plan.trade("Asset_B").unwrap().trade_value, 100_000.0, epsilon = 1e-6);
        assert_relative_eq!(plan.trade("Asset_C").unwrap().trade_value, 50_000.0, epsilon = 1e-6);
        assert_relative_eq!(plan.trade("Asset_D").unwrap().trade_value, -50_000.0, epsilon = 1e-6);
        assert_relative_eq!(plan.trade("Asset_E").unwrap().trade_value, 0.0, epsilon = 1e-6);
        assert_relative_eq!(plan.trade("Asset_A").unwrap().current_weight, 0.3);
        assert_relative_eq!(plan.turnover(), 0.15, epsilon = 1e-12);

        let after = plan.rebalanced().unwrap();
        assert_relative_eq!(after.total_value(), 1_000_000.0, epsilon = 1e-6);
        assert_relative_eq!(after.weights().unwrap()["Asset_B"], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_untargeted_assets_are_sold_and_new_ones_bought() {
        let portfolio = Portfolio::from_pairs([("OLD", 400.0), ("KEEP", 600.0)]).unwrap();
        let plan = PortfolioRebalancer::new()
            .plan(&portfolio, &targets(&[("KEEP", 0.5), ("NEW", 0.5)]))
            .unwrap();
        assert_eq!(plan.trades.len(), 3);
        assert_relative_eq!(plan.trade("OLD").unwrap().trade_value, -400.0);
        assert_relative_eq!(plan.trade("NEW").unwrap().trade_value, 500.0);
        assert_relative_eq!(plan.trade("KEEP").unwrap().trade_value, -100.0);
    }

    #[test]
    fn test_invalid_targets() {
        let rebalancer = PortfolioRebalancer::new();
        assert!(matches!(
            rebalancer.plan(&book(), &targets(&[("Asset_A", 0.6), ("Asset_B", 0.6)])),
            Err(RiskError::InvalidParameter { .. })
        ));
        assert!(matches!(
            rebalancer.plan(&book(), &targets(&[("Asset_A", 1.5), ("Asset_B", -0.5)])),
            Err(RiskError::InvalidInput(_))
        ));
        assert!(matches!(
            rebalancer.plan(&Portfolio::default(), &targets(&[("Asset_A", 1.0)])),
            Err(RiskError::Domain { .. })
        ));
    }

    #[test]
    fn test_trade_requests_in_units() {
        let portfolio = Portfolio::from_pairs([("BTC", 60_000.0), ("ETH", 40_000.0)]).unwrap();
        let plan = PortfolioRebalancer::new()
            .plan(&portfolio, &targets(&[("BTC", 0.5), ("ETH", 0.5)]))
            .unwrap();
        let prices = BTreeMap::from([("BTC".to_string(), 50_000.0), ("ETH".to_string(), 2_500.0)]);

        let requests = plan.trade_requests(&prices, 0.0).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].asset, "BTC");
        assert_relative_eq!(requests[0].quantity, -0.2);
        assert_relative_eq!(requests[1].quantity, 4.0);

        assert!(plan.trade_requests(&prices, 20_000.0).unwrap().is_empty());
        assert!(plan.trade_requests(&BTreeMap::new(), 0.0).is_err());
    }
}
