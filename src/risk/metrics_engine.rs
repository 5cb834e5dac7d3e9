//! Risk metrics bound to one return series and an optional benchmark.
//!
//! The engine validates its inputs once on construction and then delegates
//! to the pure functions in [`crate::metrics`] and
//! [`crate::risk::var_calculator`].

use crate::error::{Result, RiskError};
use crate::metrics::{self, TRADING_PERIODS_PER_YEAR};
use crate::risk::var_calculator::{self, VaRMethod};
use crate::series::{Panel, ReturnSeries};
use crate::utils::statistics::{mean, std_dev};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Per-period risk-free rate and annualization factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            periods_per_year: TRADING_PERIODS_PER_YEAR,
        }
    }
}

/// Column names expected in a single-asset frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesSchema {
    pub returns_column: String,
    pub price_column: String,
}

impl Default for SeriesSchema {
    fn default() -> Self {
        Self {
            returns_column: "returns".to_string(),
            price_column: "close".to_string(),
        }
    }
}

/// Serializable bundle of every metric the engine computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub observations: usize,
    pub confidence: f64,
    pub mean_return: f64,
    pub volatility: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub drawdown_duration: usize,
    pub calmar_ratio: f64,
    pub historical_var: f64,
    pub parametric_var: f64,
    pub conditional_var: f64,
    pub beta: Option<f64>,
    pub alpha: Option<f64>,
    pub information_ratio: Option<f64>,
    pub treynor_ratio: Option<f64>,
}

pub struct RiskMetricsEngine {
    returns: ReturnSeries,
    benchmark: Option<ReturnSeries>,
    settings: MetricsSettings,
    span: tracing::Span,
}

impl RiskMetricsEngine {
    pub fn new(returns: ReturnSeries, settings: MetricsSettings) -> Result<Self> {
        metrics::require_non_empty("RiskMetricsEngine", returns.values())?;
        Ok(Self {
            returns,
            benchmark: None,
            settings,
            span: tracing::info_span!("risk_metrics"),
        })
    }

    /// Build from a single-asset frame. The returns column wins when both
    /// columns are present; otherwise returns are derived from prices.
    pub fn from_panel(panel: &Panel, schema: &SeriesSchema, settings: MetricsSettings) -> Result<Self> {
        let returns = if panel.has_column(&schema.returns_column) {
            panel.series(&schema.returns_column)?
        } else if panel.has_column(&schema.price_column) {
            panel.pct_change(&schema.price_column)?
        } else {
            return Err(RiskError::MissingColumn {
                column: schema.returns_column.clone(),
                available: panel.columns().to_vec(),
            });
        };
        Self::new(returns, settings)
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Bind a benchmark on the same index.
    pub fn with_benchmark(mut self, benchmark: ReturnSeries) -> Result<Self> {
        if benchmark.len() != self.returns.len() {
            return Err(RiskError::LengthMismatch {
                metric: "RiskMetricsEngine::with_benchmark",
                left: self.returns.len(),
                right: benchmark.len(),
            });
        }
        if let Some(position) = self
            .returns
            .index()
            .iter()
            .zip(benchmark.index())
            .position(|(a, b)| a != b)
        {
            return Err(RiskError::IndexMismatch { position });
        }
        self.benchmark = Some(benchmark);
        Ok(self)
    }

    pub fn returns(&self) -> &ReturnSeries {
        &self.returns
    }

    pub fn settings(&self) -> &MetricsSettings {
        &self.settings
    }

    fn benchmark(&self, metric: &'static str) -> Result<&[f64]> {
        self.benchmark
            .as_ref()
            .map(ReturnSeries::values)
            .ok_or(RiskError::MissingBenchmark { metric })
    }

    pub fn sharpe(&self) -> Result<f64> {
        metrics::sharpe_ratio(self.returns.values(), self.settings.risk_free_rate)
    }

    pub fn sortino(&self) -> Result<f64> {
        metrics::sortino_ratio(self.returns.values(), self.settings.risk_free_rate)
    }

    pub fn max_drawdown(&self) -> Result<f64> {
        metrics::max_drawdown(self.returns.values())
    }

    pub fn drawdown_series(&self) -> Result<Vec<f64>> {
        metrics::drawdown_series(self.returns.values())
    }

    pub fn drawdown_duration(&self) -> Result<usize> {
        metrics::drawdown_duration(self.returns.values())
    }

    pub fn volatility(&self) -> Result<f64> {
        metrics::volatility(self.returns.values())
    }

    pub fn annualized_volatility(&self) -> Result<f64> {
        metrics::annualized_volatility(self.returns.values(), self.settings.periods_per_year)
    }

    pub fn calmar(&self) -> Result<f64> {
        metrics::calmar_ratio(self.returns.values(), self.settings.periods_per_year)
    }

    pub fn beta(&self) -> Result<f64> {
        metrics::beta(self.returns.values(), self.benchmark("beta")?)
    }

    /// Jensen's alpha on mean per-period returns.
    pub fn alpha(&self) -> Result<f64> {
        let benchmark = self.benchmark("alpha")?;
        let beta = metrics::beta(self.returns.values(), benchmark)?;
        Ok(metrics::alpha(
            beta,
            mean(self.returns.values()),
            mean(benchmark),
            self.settings.risk_free_rate,
        ))
    }

    pub fn information_ratio(&self) -> Result<f64> {
        metrics::information_ratio(self.returns.values(), self.benchmark("information_ratio")?)
    }

    pub fn treynor(&self) -> Result<f64> {
        metrics::treynor_ratio(
            self.returns.values(),
            self.benchmark("treynor_ratio")?,
            self.settings.risk_free_rate,
        )
    }

    pub fn value_at_risk(&self, confidence: f64, method: VaRMethod) -> Result<f64> {
        var_calculator::value_at_risk(self.returns.values(), confidence, method).map(|r| r.var)
    }

    pub fn conditional_value_at_risk(&self, confidence: f64) -> Result<f64> {
        var_calculator::conditional_value_at_risk(self.returns.values(), confidence)
    }

    /// Historical VaR in currency units for a position of `portfolio_value`.
    pub fn value_at_risk_amount(&self, portfolio_value: f64, confidence: f64) -> Result<f64> {
        if !portfolio_value.is_finite() {
            return Err(RiskError::invalid_parameter(
                "portfolio_value",
                portfolio_value,
                "must be finite",
            ));
        }
        let var = var_calculator::historical_var(self.returns.values(), confidence)?;
        Ok(portfolio_value * var)
    }

    /// Population volatility over a trailing window; the first `window - 1`
    /// entries are NaN.
    pub fn rolling_volatility(&self, window: usize) -> Result<Vec<f64>> {
        self.rolling("rolling_volatility", window, std_dev)
    }

    /// Sharpe ratio over a trailing window; windows with zero spread are NaN.
    pub fn rolling_sharpe(&self, window: usize) -> Result<Vec<f64>> {
        let rf = self.settings.risk_free_rate;
        self.rolling("rolling_sharpe", window, |w| {
            metrics::sharpe_ratio(w, rf).unwrap_or(f64::NAN)
        })
    }

    fn rolling(
        &self,
        metric: &'static str,
        window: usize,
        f: impl Fn(&[f64]) -> f64,
    ) -> Result<Vec<f64>> {
        let values = self.returns.values();
        if window == 0 {
            return Err(RiskError::domain(metric, "non-positive window", values.len()));
        }
        let mut out = vec![f64::NAN; values.len()];
        for (end, slot) in out.iter_mut().enumerate().skip(window - 1) {
            *slot = f(&values[end + 1 - window..=end]);
        }
        Ok(out)
    }

    /// Zero-mean exponentially weighted volatility with `alpha = 2 / (span + 1)`,
    /// seeded with the first squared return.
    pub fn ewma_volatility(&self, span: usize) -> Result<Vec<f64>> {
        let values = self.returns.values();
        if span == 0 {
            return Err(RiskError::domain("ewma_volatility", "non-positive span", values.len()));
        }
        let alpha = 2.0 / (span as f64 + 1.0);
        let mut variance = values[0] * values[0];
        let mut out = Vec::with_capacity(values.len());
        out.push(variance.sqrt());
        for r in &values[1..] {
            variance = (1.0 - alpha) * variance + alpha * r * r;
            out.push(variance.sqrt());
        }
        Ok(out)
    }

    /// Every metric at once; any failing metric fails the report.
    pub fn report(&self, confidence: f64) -> Result<RiskReport> {
        let values = self.returns.values();
        debug!(parent: &self.span, observations = values.len(), confidence, "computing risk report");

        let (beta, alpha, information_ratio, treynor_ratio) = if self.benchmark.is_some() {
            (
                Some(self.beta()?),
                Some(self.alpha()?),
                Some(self.information_ratio()?),
                Some(self.treynor()?),
            )
        } else {
            (None, None, None, None)
        };

        let report = RiskReport {
            observations: values.len(),
            confidence,
            mean_return: mean(values),
            volatility: self.volatility()?,
            annualized_volatility: self.annualized_volatility()?,
            sharpe_ratio: self.sharpe()?,
            sortino_ratio: self.sortino()?,
            max_drawdown: self.max_drawdown()?,
            drawdown_duration: self.drawdown_duration()?,
            calmar_ratio: self.calmar()?,
            historical_var: var_calculator::historical_var(values, confidence)?,
            parametric_var: var_calculator::parametric_var(values, confidence)?,
            conditional_var: self.conditional_value_at_risk(confidence)?,
            beta,
            alpha,
            information_ratio,
            treynor_ratio,
        };

        info!(
            parent: &self.span,
            sharpe = report.sharpe_ratio,
            max_drawdown = report.max_drawdown,
            historical_var = report.historical_var,
            "risk report computed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const RETURNS: [f64; 8] = [0.01, -0.02, 0.015, 0.003, -0.007, 0.012, -0.004, 0.009];
    const BENCHMARK: [f64; 8] = [0.008, -0.015, 0.01, 0.002, -0.005, 0.01, -0.002, 0.006];

    fn engine() -> RiskMetricsEngine {
        RiskMetricsEngine::new(
            ReturnSeries::from_values(RETURNS.to_vec()).unwrap(),
            MetricsSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_empty_series() {
        let empty = ReturnSeries::from_values(Vec::new()).unwrap();
        assert!(matches!(
            RiskMetricsEngine::new(empty, MetricsSettings::default()),
            Err(RiskError::Domain { .. })
        ));
    }

    #[test]
    fn test_bound_metrics_match_library() {
        let engine = engine();
        assert_relative_eq!(engine.sharpe().unwrap(), metrics::sharpe_ratio(&RETURNS, 0.0).unwrap());
        assert_relative_eq!(engine.max_drawdown().unwrap(), metrics::max_drawdown(&RETURNS).unwrap());
        assert_relative_eq!(
            engine.value_at_risk(0.95, VaRMethod::Historical).unwrap(),
            var_calculator::historical_var(&RETURNS, 0.95).unwrap()
        );
    }

    #[test]
    fn test_benchmark_metrics_require_benchmark() {
        let engine = engine();
        assert!(matches!(engine.beta(), Err(RiskError::MissingBenchmark { metric: "beta" })));
        assert!(matches!(engine.treynor(), Err(RiskError::MissingBenchmark { .. })));

        let report = engine.report(0.95).unwrap();
        assert!(report.beta.is_none());
        assert!(report.information_ratio.is_none());
    }

    #[test]
    fn test_benchmark_alignment() {
        let short = ReturnSeries::from_values(BENCHMARK[..7].to_vec()).unwrap();
        assert!(matches!(
            engine().with_benchmark(short),
            Err(RiskError::LengthMismatch { .. })
        ));

        let shifted_index: Vec<_> = engine()
            .returns()
            .index()
            .iter()
            .map(|t| *t + chrono::Duration::hours(1))
            .collect();
        let shifted = ReturnSeries::new(shifted_index, BENCHMARK.to_vec()).unwrap();
        assert!(matches!(
            engine().with_benchmark(shifted),
            Err(RiskError::IndexMismatch { position: 0 })
        ));

        let bench = ReturnSeries::from_values(BENCHMARK.to_vec()).unwrap();
        let report = engine().with_benchmark(bench).unwrap().report(0.95).unwrap();
        assert!(report.beta.unwrap() > 0.0);
    }

    #[test]
    fn test_from_panel_prefers_returns_then_prices() {
        let prices = vec![100.0, 101.0, 99.0, 102.0];
        let panel = Panel::with_len(4).with_column("close", prices).unwrap();
        let engine = RiskMetricsEngine::from_panel(&panel, &SeriesSchema::default(), MetricsSettings::default())
            .unwrap();
        assert_eq!(engine.returns().len(), 3);
        assert_relative_eq!(engine.returns().values()[0], 0.01, epsilon = 1e-12);

        let panel = Panel::with_len(2).with_column("volume", vec![1.0, 2.0]).unwrap();
        assert!(matches!(
            RiskMetricsEngine::from_panel(&panel, &SeriesSchema::default(), MetricsSettings::default()),
            Err(RiskError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_rolling_windows() {
        let engine = engine();
        let vol = engine.rolling_volatility(3).unwrap();
        assert_eq!(vol.len(), RETURNS.len());
        assert!(vol[0].is_nan() && vol[1].is_nan());
        assert_relative_eq!(vol[2], std_dev(&RETURNS[0..3]), epsilon = 1e-15);
        assert!(engine.rolling_sharpe(0).is_err());
        assert!(engine.ewma_volatility(0).is_err());
    }

    #[test]
    fn test_ewma_volatility_recursion() {
        let engine = engine();
        let ewma = engine.ewma_volatility(3).unwrap();
        let alpha = 0.5;
        let v1 = (1.0 - alpha) * RETURNS[0].powi(2) + alpha * RETURNS[1].powi(2);
        assert_relative_eq!(ewma[0], RETURNS[0].abs(), epsilon = 1e-15);
        assert_relative_eq!(ewma[1], v1.sqrt(), epsilon = 1e-15);
    }

    #[test]
    fn test_currency_var() {
        let engine = engine();
        let var = var_calculator::historical_var(&RETURNS, 0.95).unwrap();
        assert_relative_eq!(engine.value_at_risk_amount(1_000_000.0, 0.95).unwrap(), 1_000_000.0 * var);
    }
}
