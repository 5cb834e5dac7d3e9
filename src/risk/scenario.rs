//! Scenario analysis and stress testing
//!
//! A scenario shocks asset values by a percentage. Stress testing is the
//! same mechanics applied to several scenarios, ranked by total impact.

use super::{AssetId, Portfolio};
use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Named set of percentage changes, e.g. `{"AssetA": -20.0}` for a 20 % drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub changes: BTreeMap<AssetId, f64>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, changes: BTreeMap<AssetId, f64>) -> Self {
        Self {
            name: name.into(),
            changes,
        }
    }

    pub fn from_pairs<I, S>(name: impl Into<String>, changes: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<AssetId>,
    {
        Self::new(name, changes.into_iter().map(|(a, c)| (a.into(), c)).collect())
    }

    /// Percentage change for `asset`; unlisted assets are unchanged.
    pub fn change(&self, asset: &str) -> f64 {
        self.changes.get(asset).copied().unwrap_or(0.0)
    }

    fn validate(&self) -> Result<()> {
        match self.changes.iter().find(|(_, c)| !c.is_finite()) {
            Some((asset, change)) => Err(RiskError::InvalidInput(format!(
                "scenario '{}' has non-finite change {} for {}",
                self.name, change, asset
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetImpact {
    pub asset: AssetId,
    pub value: f64,
    /// Percentage applied
    pub change: f64,
    pub new_value: f64,
    pub impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub impacts: Vec<AssetImpact>,
    pub total_impact: f64,
}

impl ScenarioResult {
    pub fn impact(&self, asset: &str) -> Option<&AssetImpact> {
        self.impacts.iter().find(|i| i.asset == asset)
    }

    pub fn new_total_value(&self) -> f64 {
        self.impacts.iter().map(|i| i.new_value).sum()
    }
}

/// Applies scenarios to portfolio snapshots.
pub struct ScenarioEngine {
    span: tracing::Span,
}

impl Default for ScenarioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioEngine {
    pub fn new() -> Self {
        Self {
            span: tracing::info_span!("scenario_engine"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// `new_value = value · (1 + change / 100)` per asset, in asset order.
    pub fn apply(&self, portfolio: &Portfolio, scenario: &Scenario) -> Result<ScenarioResult> {
        scenario.validate()?;

        let impacts: Vec<AssetImpact> = portfolio
            .values()
            .iter()
            .map(|(asset, &value)| {
                let change = scenario.change(asset);
                let new_value = value * (1.0 + change / 100.0);
                AssetImpact {
                    asset: asset.clone(),
                    value,
                    change,
                    new_value,
                    impact: new_value - value,
                }
            })
            .collect();
        let total_impact = impacts.iter().map(|i| i.impact).sum();

        for unknown in scenario.changes.keys().filter(|a| portfolio.value(a).is_none()) {
            debug!(parent: &self.span, scenario = %scenario.name, asset = %unknown, "change for asset not held");
        }
        info!(
            parent: &self.span,
            scenario = %scenario.name,
            assets = impacts.len(),
            total_impact,
            "scenario applied"
        );

        Ok(ScenarioResult {
            scenario: scenario.name.clone(),
            impacts,
            total_impact,
        })
    }

    /// Every scenario applied to the same snapshot, worst total impact first.
    pub fn stress_test(&self, portfolio: &Portfolio, scenarios: &[Scenario]) -> Result<Vec<ScenarioResult>> {
        let mut results = scenarios
            .iter()
            .map(|s| self.apply(portfolio, s))
            .collect::<Result<Vec<_>>>()?;
        results.sort_by(|a, b| a.total_impact.total_cmp(&b.total_impact));

        if let Some(worst) = results.first() {
            info!(
                parent: &self.span,
                scenarios = results.len(),
                worst = %worst.scenario,
                worst_impact = worst.total_impact,
                "stress test complete"
            );
        }
        Ok(results)
    }
}
