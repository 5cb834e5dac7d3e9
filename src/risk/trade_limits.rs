//! Position and trade-count limits per asset.
//!
//! A breach is reported in the returned [`LimitCheck`], never as an error.
//! Under [`BreachPolicy::Retain`] a breaching trade still moves the running
//! position and trade count; [`BreachPolicy::RollBack`] undoes both.

use crate::error::{Result, RiskError};
use crate::risk::AssetId;
use crate::utils::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What happens to state updates made by a breaching trade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachPolicy {
    /// Keep the update (the position already reflects the trade).
    #[default]
    Retain,
    /// Undo position and trade-count updates when either limit is breached.
    RollBack,
}

/// Limits configured for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetLimits {
    /// Maximum absolute running position.
    pub position_limit: f64,
    /// Maximum trades inside the trade window.
    pub trade_limit: usize,
}

/// Outcome of a position and trade-count check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitCheck {
    pub position_ok: bool,
    pub trade_count_ok: bool,
    pub position: f64,
    pub trade_count: usize,
}

impl LimitCheck {
    pub fn allowed(&self) -> bool {
        self.position_ok && self.trade_count_ok
    }
}

/// Running position and recent trade instants for one asset.
#[derive(Debug, Clone, Default)]
pub struct AssetExposure {
    position: f64,
    trades: VecDeque<Duration>,
}

impl AssetExposure {
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Trades inside the window ending at `now`.
    pub fn trade_count(&mut self, now: Duration, window: Duration) -> usize {
        self.prune(now, window);
        self.trades.len()
    }

    fn prune(&mut self, now: Duration, window: Duration) {
        if let Some(cutoff) = now.checked_sub(window) {
            while self.trades.front().is_some_and(|t| *t < cutoff) {
                self.trades.pop_front();
            }
        }
    }

    /// Apply the signed quantity to the running position.
    pub fn update_position(&mut self, quantity: f64, limits: &AssetLimits) -> bool {
        self.position += quantity;
        self.position.abs() <= limits.position_limit
    }

    /// Count a trade at `now`.
    pub fn update_trade_count(&mut self, now: Duration, window: Duration, limits: &AssetLimits) -> bool {
        self.trades.push_back(now);
        self.prune(now, window);
        self.trades.len() <= limits.trade_limit
    }

    /// Both updates, then the policy decides whether they stick.
    pub fn apply(
        &mut self,
        quantity: f64,
        now: Duration,
        window: Duration,
        limits: &AssetLimits,
        policy: BreachPolicy,
    ) -> LimitCheck {
        let previous_position = self.position;
        let position_ok = self.update_position(quantity, limits);
        let trade_count_ok = self.update_trade_count(now, window, limits);

        if policy == BreachPolicy::RollBack && !(position_ok && trade_count_ok) {
            self.position = previous_position;
            self.trades.pop_back();
        }

        LimitCheck {
            position_ok,
            trade_count_ok,
            position: self.position,
            trade_count: self.trades.len(),
        }
    }
}

/// Position and trade-count gate over a fixed set of assets.
pub struct TradeLimitGate {
    limits: HashMap<AssetId, AssetLimits>,
    time_window: Duration,
    policy: BreachPolicy,
    exposures: Mutex<HashMap<AssetId, AssetExposure>>,
    clock: Arc<dyn Clock>,
    span: tracing::Span,
}

impl TradeLimitGate {
    pub fn new(
        limits: HashMap<AssetId, AssetLimits>,
        time_window: Duration,
        policy: BreachPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_limits(&limits, time_window)?;
        Ok(Self {
            limits,
            time_window,
            policy,
            exposures: Mutex::new(HashMap::new()),
            clock,
            span: tracing::info_span!("trade_limits"),
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn policy(&self) -> BreachPolicy {
        self.policy
    }

    fn limits_for(&self, asset: &str) -> Result<&AssetLimits> {
        self.limits.get(asset).ok_or_else(|| RiskError::MissingLimit {
            asset: asset.to_string(),
        })
    }

    /// Move the position by `quantity`; `false` if the position limit is breached.
    pub fn update_position(&self, asset: &str, quantity: f64) -> Result<bool> {
        let limits = self.limits_for(asset)?;
        let mut exposures = self.exposures.lock();
        let exposure = exposures.entry(asset.to_string()).or_default();
        let previous = exposure.position;
        let ok = exposure.update_position(quantity, limits);
        if !ok {
            warn!(parent: &self.span, asset, position = exposure.position, limit = limits.position_limit, "position limit exceeded");
            if self.policy == BreachPolicy::RollBack {
                exposure.position = previous;
            }
        }
        Ok(ok)
    }

    /// Count one trade now; `false` if the trade-count limit is breached.
    pub fn update_trade_count(&self, asset: &str) -> Result<bool> {
        let limits = self.limits_for(asset)?;
        let now = self.clock.now();
        let mut exposures = self.exposures.lock();
        let exposure = exposures.entry(asset.to_string()).or_default();
        let ok = exposure.update_trade_count(now, self.time_window, limits);
        if !ok {
            warn!(parent: &self.span, asset, trades = exposure.trades.len(), limit = limits.trade_limit, "trade limit exceeded");
            if self.policy == BreachPolicy::RollBack {
                exposure.trades.pop_back();
            }
        }
        Ok(ok)
    }

    /// Position and trade-count checks for one trade, applied atomically.
    pub fn check_risk_controls(&self, asset: &str, quantity: f64) -> Result<LimitCheck> {
        let limits = self.limits_for(asset)?;
        let now = self.clock.now();
        let mut exposures = self.exposures.lock();
        let exposure = exposures.entry(asset.to_string()).or_default();
        let check = exposure.apply(quantity, now, self.time_window, limits, self.policy);
        if check.allowed() {
            debug!(parent: &self.span, asset, position = check.position, trades = check.trade_count, "trade within limits");
        } else {
            warn!(
                parent: &self.span,
                asset,
                position_ok = check.position_ok,
                trade_count_ok = check.trade_count_ok,
                "trade breaches limits"
            );
        }
        Ok(check)
    }

    pub fn position(&self, asset: &str) -> f64 {
        self.exposures.lock().get(asset).map_or(0.0, AssetExposure::position)
    }

    pub fn trade_count(&self, asset: &str) -> usize {
        let now = self.clock.now();
        self.exposures
            .lock()
            .get_mut(asset)
            .map_or(0, |e| e.trade_count(now, self.time_window))
    }
}

pub(crate) fn validate_limits(limits: &HashMap<AssetId, AssetLimits>, time_window: Duration) -> Result<()> {
    if time_window.is_zero() {
        return Err(RiskError::invalid_parameter(
            "trade_window",
            format!("{time_window:?}"),
            "must be positive",
        ));
    }
    for (asset, limit) in limits {
        if !(limit.position_limit.is_finite() && limit.position_limit >= 0.0) {
            return Err(RiskError::InvalidInput(format!(
                "position limit for {asset} must be finite and non-negative"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn gate(policy: BreachPolicy) -> (TradeLimitGate, ManualClock) {
        let clock = ManualClock::new();
        let limits = HashMap::from([
            ("Asset_A".to_string(), AssetLimits { position_limit: 1000.0, trade_limit: 3 }),
            ("Asset_B".to_string(), AssetLimits { position_limit: 2000.0, trade_limit: 20 }),
        ]);
        let gate = TradeLimitGate::new(limits, Duration::from_secs(60), policy, Arc::new(clock.clone())).unwrap();
        (gate, clock)
    }

    #[test]
    fn test_position_breach_is_retained_by_default() {
        let (gate, _) = gate(BreachPolicy::default());
        assert!(gate.check_risk_controls("Asset_A", 700.0).unwrap().allowed());
        let check = gate.check_risk_controls("Asset_A", 400.0).unwrap();
        assert!(!check.position_ok);
        assert!(check.trade_count_ok);
        assert_eq!(gate.position("Asset_A"), 1100.0);
        // Selling back inside the limit passes again.
        assert!(gate.check_risk_controls("Asset_A", -200.0).unwrap().allowed());
        assert_eq!(gate.position("Asset_A"), 900.0);
    }

    #[test]
    fn test_roll_back_undoes_both_updates() {
        let (gate, _) = gate(BreachPolicy::RollBack);
        gate.check_risk_controls("Asset_A", 700.0).unwrap();
        let check = gate.check_risk_controls("Asset_A", 400.0).unwrap();
        assert!(!check.allowed());
        assert_eq!(check.position, 700.0);
        assert_eq!(gate.position("Asset_A"), 700.0);
        assert_eq!(gate.trade_count("Asset_A"), 1);
    }

    #[test]
    fn test_trade_count_window() {
        let (gate, clock) = gate(BreachPolicy::Retain);
        for _ in 0..3 {
            assert!(gate.update_trade_count("Asset_A").unwrap());
            clock.advance(Duration::from_secs(10));
        }
        assert!(!gate.update_trade_count("Asset_A").unwrap());
        assert_eq!(gate.trade_count("Asset_A"), 4);
        // First trade at 0s leaves the window after 60s.
        clock.set(Duration::from_secs(61));
        assert_eq!(gate.trade_count("Asset_A"), 3);
    }

    #[test]
    fn test_short_position_limit_uses_absolute_value() {
        let (gate, _) = gate(BreachPolicy::Retain);
        assert!(gate.update_position("Asset_B", -2000.0).unwrap());
        assert!(!gate.update_position("Asset_B", -1.0).unwrap());
    }

    #[test]
    fn test_missing_limit() {
        let (gate, _) = gate(BreachPolicy::Retain);
        assert!(matches!(
            gate.check_risk_controls("Asset_Z", 1.0),
            Err(RiskError::MissingLimit { asset }) if asset == "Asset_Z"
        ));
    }
}
