//! Percentage stop-loss levels for long positions.

use super::{AssetId, TradeRequest};
use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A triggered stop and the order that flattens the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossExit {
    pub asset: AssetId,
    pub stop_price: f64,
    pub current_price: f64,
    pub request: TradeRequest,
}

pub struct StopLoss {
    /// Loss threshold in percent of the entry price, e.g. `10.0`
    percentage: f64,
    span: tracing::Span,
}

impl StopLoss {
    pub fn new(percentage: f64) -> Result<Self> {
        if !(percentage.is_finite() && percentage > 0.0 && percentage < 100.0) {
            return Err(RiskError::invalid_parameter(
                "stop_loss_percentage",
                percentage,
                "must lie in (0, 100)",
            ));
        }
        let span = tracing::info_span!("stop_loss");
        info!(parent: &span, percentage, "stop-loss initialized");
        Ok(Self { percentage, span })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    /// `entry_price · (1 − percentage / 100)`.
    pub fn set_stop_loss(&self, entry_price: f64) -> Result<f64> {
        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(RiskError::invalid_parameter(
                "entry_price",
                entry_price,
                "must be positive and finite",
            ));
        }
        let stop_price = entry_price * (1.0 - self.percentage / 100.0);
        debug!(parent: &self.span, entry_price, stop_price, "stop-loss set");
        Ok(stop_price)
    }

    /// Triggered when the price is at or below the stop.
    pub fn check_stop_loss(&self, current_price: f64, stop_price: f64) -> bool {
        let triggered = current_price <= stop_price;
        if triggered {
            warn!(parent: &self.span, current_price, stop_price, "stop-loss triggered");
        }
        triggered
    }

    /// The closing order for `position` units of `asset` when the stop is
    /// hit, `None` otherwise or when flat.
    pub fn exit(&self, asset: &str, position: f64, current_price: f64, stop_price: f64) -> Option<StopLossExit> {
        if position == 0.0 || !self.check_stop_loss(current_price, stop_price) {
            return None;
        }
        Some(StopLossExit {
            asset: asset.to_string(),
            stop_price,
            current_price,
            request: TradeRequest::new(asset, -position),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stop_price_and_triggers() {
        let stop = StopLoss::new(10.0).unwrap();
        let level = stop.set_stop_loss(100.0).unwrap();
        assert_relative_eq!(level, 90.0);

        let triggered: Vec<bool> = [95.0, 85.0, 105.0, 90.0]
            .iter()
            .map(|p| stop.check_stop_loss(*p, level))
            .collect();
        assert_eq!(triggered, vec![false, true, false, true]);
    }

    #[test]
    fn test_exit_flattens_position() {
        let stop = StopLoss::new(5.0).unwrap();
        let level = stop.set_stop_loss(200.0).unwrap();
        assert!(stop.exit("ETH", 3.0, 195.0, level).is_none());

        let exit = stop.exit("ETH", 3.0, 189.0, level).unwrap();
        assert_eq!(exit.request.asset, "ETH");
        assert_relative_eq!(exit.request.quantity, -3.0);
        assert!(stop.exit("ETH", 0.0, 100.0, level).is_none());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(StopLoss::new(0.0).is_err());
        assert!(StopLoss::new(100.0).is_err());
        assert!(StopLoss::new(f64::NAN).is_err());
        let stop = StopLoss::new(10.0).unwrap();
        assert!(matches!(
            stop.set_stop_loss(-1.0),
            Err(RiskError::InvalidParameter { name: "entry_price", .. })
        ));
    }
}
