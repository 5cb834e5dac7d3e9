//! Engine configuration
//!
//! Loaded from TOML, then overridden by `RISK_ENGINE_*` environment variables.
//! Every section has defaults, so an empty file is a valid configuration.

use crate::error::{Result, RiskError};
use crate::models::{StatArbSettings, StatisticalArbitrageEngine};
use crate::risk::trade_limits::validate_limits;
use crate::risk::{
    AssetId, AssetLimits, BreachPolicy, EnforcerSettings, MetricsSettings, OptimizerSettings,
    RiskLimits,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "RISK_ENGINE_";

/// Rate and trade-count windows in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub rate_limit: usize,
    pub rate_window_secs: f64,
    pub trade_window_secs: f64,
    pub policy: BreachPolicy,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        let settings = EnforcerSettings::default();
        Self {
            rate_limit: settings.rate_limit,
            rate_window_secs: settings.rate_window.as_secs_f64(),
            trade_window_secs: settings.trade_window.as_secs_f64(),
            policy: settings.policy,
        }
    }
}

impl ThrottleConfig {
    pub fn enforcer_settings(&self) -> Result<EnforcerSettings> {
        Ok(EnforcerSettings {
            rate_limit: self.rate_limit,
            rate_window: seconds("rate_window_secs", self.rate_window_secs)?,
            trade_window: seconds("trade_window_secs", self.trade_window_secs)?,
            policy: self.policy,
        })
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| RiskError::Config(format!("throttle.{name} must be positive, got {secs}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Confidence for VaR figures in reports
    pub confidence: f64,
    pub metrics: MetricsSettings,
    pub throttle: ThrottleConfig,
    pub trade_limits: HashMap<AssetId, AssetLimits>,
    pub optimizer: OptimizerSettings,
    pub stat_arb: StatArbSettings,
    pub risk_limits: RiskLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            metrics: MetricsSettings::default(),
            throttle: ThrottleConfig::default(),
            trade_limits: HashMap::new(),
            optimizer: OptimizerSettings::default(),
            stat_arb: StatArbSettings::default(),
            risk_limits: RiskLimits::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| RiskError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RiskError::Config(e.to_string()))
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies `RISK_ENGINE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("CONFIDENCE") {
            self.confidence = parse("CONFIDENCE", &v)?;
        }
        if let Some(v) = get("RISK_FREE_RATE") {
            self.metrics.risk_free_rate = parse("RISK_FREE_RATE", &v)?;
        }
        if let Some(v) = get("PERIODS_PER_YEAR") {
            let periods = parse("PERIODS_PER_YEAR", &v)?;
            self.metrics.periods_per_year = periods;
            self.optimizer.periods_per_year = periods;
        }
        if let Some(v) = get("RATE_LIMIT") {
            self.throttle.rate_limit = parse("RATE_LIMIT", &v)?;
        }
        if let Some(v) = get("RATE_WINDOW_SECS") {
            self.throttle.rate_window_secs = parse("RATE_WINDOW_SECS", &v)?;
        }
        if let Some(v) = get("TRADE_WINDOW_SECS") {
            self.throttle.trade_window_secs = parse("TRADE_WINDOW_SECS", &v)?;
        }
        if let Some(v) = get("BREACH_POLICY") {
            self.throttle.policy = match v.to_lowercase().as_str() {
                "retain" => BreachPolicy::Retain,
                "roll_back" | "rollback" => BreachPolicy::RollBack,
                other => {
                    return Err(RiskError::Config(format!(
                        "{ENV_PREFIX}BREACH_POLICY: unknown policy '{other}'"
                    )))
                }
            };
        }
        if let Some(v) = get("SIGNIFICANCE") {
            self.stat_arb.significance = parse("SIGNIFICANCE", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(RiskError::Config(format!(
                "confidence must lie strictly between 0 and 1, got {}",
                self.confidence
            )));
        }
        if !(self.metrics.periods_per_year > 0.0) || !(self.optimizer.periods_per_year > 0.0) {
            return Err(RiskError::Config("periods_per_year must be positive".to_string()));
        }
        if self.throttle.rate_limit == 0 {
            return Err(RiskError::Config("throttle.rate_limit must be at least 1".to_string()));
        }
        let settings = self.throttle.enforcer_settings()?;
        validate_limits(&self.trade_limits, settings.trade_window).map_err(config_error)?;
        if self.optimizer.max_iterations == 0 || !(self.optimizer.tolerance > 0.0) {
            return Err(RiskError::Config(
                "optimizer needs max_iterations >= 1 and a positive tolerance".to_string(),
            ));
        }
        StatisticalArbitrageEngine::new(self.stat_arb).map_err(config_error)?;
        if let Some((factor, limit)) = self.risk_limits.iter().find(|(_, l)| !l.is_finite()) {
            return Err(RiskError::Config(format!(
                "risk limit for {factor} must be finite, got {limit}"
            )));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RiskError::Config(format!("{ENV_PREFIX}{name}: cannot parse '{value}'")))
}

fn config_error(err: RiskError) -> RiskError {
    RiskError::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            confidence = 0.99

            [metrics]
            risk_free_rate = 0.0001

            [throttle]
            rate_limit = 10
            rate_window_secs = 1.5
            policy = "roll_back"

            [trade_limits.BTC]
            position_limit = 5.0
            trade_limit = 3

            [stat_arb]
            entry_threshold = 2.5
            mode = "hysteresis"

            [risk_limits]
            volatility = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.confidence, 0.99);
        assert_eq!(config.metrics.risk_free_rate, 0.0001);
        assert_eq!(config.metrics.periods_per_year, 252.0);
        assert_eq!(config.throttle.rate_limit, 10);
        assert_eq!(config.throttle.policy, BreachPolicy::RollBack);
        assert_eq!(config.trade_limits["BTC"].trade_limit, 3);
        assert_eq!(config.stat_arb.entry_threshold, 2.5);
        assert_eq!(config.stat_arb.mode, crate::models::SignalMode::Hysteresis);
        assert_eq!(config.risk_limits["volatility"], 0.2);

        let settings = config.throttle.enforcer_settings().unwrap();
        assert_eq!(settings.rate_window, Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[throttle]\nrate_limit = 7").unwrap();
        let config = EngineConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.throttle.rate_limit, 7);

        assert!(matches!(
            EngineConfig::from_toml("/nonexistent/risk.toml"),
            Err(RiskError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RISK_ENGINE_RATE_LIMIT", "12"),
            ("RISK_ENGINE_PERIODS_PER_YEAR", "365"),
            ("RISK_ENGINE_BREACH_POLICY", "rollback"),
            ("UNRELATED", "x"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.throttle.rate_limit, 12);
        assert_eq!(config.metrics.periods_per_year, 365.0);
        assert_eq!(config.optimizer.periods_per_year, 365.0);
        assert_eq!(config.throttle.policy, BreachPolicy::RollBack);

        let err = EngineConfig::default()
            .apply_overrides(|k| (k == "RISK_ENGINE_RATE_LIMIT").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RISK_ENGINE_RATE_LIMIT"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = EngineConfig::default();
        config.confidence = 1.0;
        assert!(matches!(config.validate(), Err(RiskError::Config(_))));

        let mut config = EngineConfig::default();
        config.throttle.rate_window_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.stat_arb.exit_threshold = 3.0;
        assert!(config.validate().is_err());

        assert!(EngineConfig::from_toml_str("confidence = \"high\"").is_err());
    }
}
