//! Pairs trading on cointegrated price series.
//!
//! Pairs are found with the Engle-Granger test, the spread between the two
//! legs is standardized into a z-score, and thresholds on the z-score become
//! spread positions.

use crate::error::{Result, RiskError};
use crate::metrics::is_degenerate;
use crate::models::cointegration::{engle_granger, CointegrationResult};
use crate::series::Panel;
use crate::utils::statistics::{mean, sample_std_dev};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Position on the spread `a - b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Buy the spread (+1)
    LongSpread,
    /// Sell the spread (-1)
    ShortSpread,
    /// No position (0)
    Flat,
}

impl Signal {
    pub fn as_i8(&self) -> i8 {
        match self {
            Signal::LongSpread => 1,
            Signal::ShortSpread => -1,
            Signal::Flat => 0,
        }
    }
}

/// What happens between the exit and entry bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Flat unless beyond the entry band.
    #[default]
    Stateless,
    /// Keep the previous signal until the exit band is reached.
    Hysteresis,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ZScoreMethod {
    /// Mean and std over the whole spread.
    #[default]
    Full,
    /// Trailing mean and std; the first `window - 1` values are NaN.
    Rolling { window: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadKind {
    /// `a - b`
    #[default]
    Simple,
    /// `a - β·b` with the Engle-Granger slope
    Hedged,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatArbSettings {
    pub significance: f64,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub mode: SignalMode,
    pub z_score: ZScoreMethod,
    pub spread: SpreadKind,
    /// ADF lag cap; Schwert's rule when unset
    pub max_lag: Option<usize>,
}

impl Default for StatArbSettings {
    fn default() -> Self {
        Self {
            significance: 0.05,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
            mode: SignalMode::Stateless,
            z_score: ZScoreMethod::Full,
            spread: SpreadKind::Simple,
            max_lag: None,
        }
    }
}

/// Signals aligned with the spread's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSeries {
    pub index: Vec<DateTime<Utc>>,
    pub signals: Vec<Signal>,
}

impl SignalSeries {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Positions where the signal changes.
    pub fn transitions(&self) -> Vec<(usize, Signal)> {
        let mut previous = Signal::Flat;
        let mut out = Vec::new();
        for (i, signal) in self.signals.iter().enumerate() {
            if *signal != previous {
                out.push((i, *signal));
                previous = *signal;
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CointegratedPair {
    pub first: String,
    pub second: String,
    pub result: CointegrationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairAnalysis {
    pub pair: CointegratedPair,
    pub spread: Vec<f64>,
    pub z_score: Vec<f64>,
    pub signals: SignalSeries,
}

pub fn spread(a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
    hedged_spread(a, b, 1.0)
}

pub fn hedged_spread(a: &[f64], b: &[f64], hedge_ratio: f64) -> Result<Vec<f64>> {
    if a.len() != b.len() {
        return Err(RiskError::LengthMismatch {
            metric: "spread",
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(a.iter().zip(b).map(|(x, y)| x - hedge_ratio * y).collect())
}

/// Standardize a spread with the sample standard deviation.
pub fn z_score(spread: &[f64], method: ZScoreMethod) -> Result<Vec<f64>> {
    match method {
        ZScoreMethod::Full => {
            if spread.len() < 2 {
                return Err(RiskError::domain("z_score", "need at least two observations", spread.len()));
            }
            let mu = mean(spread);
            let sigma = sample_std_dev(spread);
            if is_degenerate(sigma, spread) {
                return Err(RiskError::domain("z_score", "spread has zero standard deviation", spread.len()));
            }
            Ok(spread.iter().map(|s| (s - mu) / sigma).collect())
        }
        ZScoreMethod::Rolling { window } => {
            if window < 2 {
                return Err(RiskError::domain(
                    "z_score",
                    "rolling window must cover at least two observations",
                    spread.len(),
                ));
            }
            let mut out = vec![f64::NAN; spread.len()];
            for end in window - 1..spread.len() {
                let slice = &spread[end + 1 - window..=end];
                let mu = mean(slice);
                let sigma = sample_std_dev(slice);
                if !is_degenerate(sigma, slice) {
                    out[end] = (spread[end] - mu) / sigma;
                }
            }
            Ok(out)
        }
    }
}

/// Threshold a z-score into spread positions. NaN maps to `Flat`.
pub fn generate_signals(z: &[f64], entry: f64, exit: f64, mode: SignalMode) -> Vec<Signal> {
    let mut previous = Signal::Flat;
    z.iter()
        .map(|&value| {
            let signal = if value.is_nan() {
                Signal::Flat
            } else if value > entry {
                Signal::ShortSpread
            } else if value < -entry {
                Signal::LongSpread
            } else if value.abs() < exit {
                Signal::Flat
            } else {
                match mode {
                    SignalMode::Stateless => Signal::Flat,
                    SignalMode::Hysteresis => previous,
                }
            };
            previous = signal;
            signal
        })
        .collect()
}

pub struct StatisticalArbitrageEngine {
    settings: StatArbSettings,
    span: tracing::Span,
}

impl StatisticalArbitrageEngine {
    pub fn new(settings: StatArbSettings) -> Result<Self> {
        if !(settings.significance > 0.0 && settings.significance < 1.0) {
            return Err(RiskError::invalid_parameter(
                "significance",
                settings.significance,
                "must lie strictly between 0 and 1",
            ));
        }
        if !(settings.exit_threshold >= 0.0 && settings.exit_threshold <= settings.entry_threshold) {
            return Err(RiskError::invalid_parameter(
                "exit_threshold",
                settings.exit_threshold,
                "must lie in [0, entry_threshold]",
            ));
        }
        Ok(Self {
            settings,
            span: tracing::info_span!("statistical_arbitrage"),
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn settings(&self) -> &StatArbSettings {
        &self.settings
    }

    /// Test every unordered column pair `(i, j)`, `i < j`, in parallel and
    /// keep those below the significance level, in column order.
    ///
    /// A pair whose test cannot be computed (a constant column, a singular
    /// regression) counts as not cointegrated. Non-finite prices fail the
    /// whole scan.
    pub fn find_cointegrated_pairs(&self, prices: &Panel) -> Result<Vec<CointegratedPair>> {
        let columns = prices.columns();
        let pairs: Vec<(usize, usize)> = (0..columns.len())
            .flat_map(|i| (i + 1..columns.len()).map(move |j| (i, j)))
            .collect();

        let tested: Vec<(usize, usize, Result<CointegrationResult>)> = pairs
            .par_iter()
            .map(|&(i, j)| {
                let result = prices.column(&columns[i]).and_then(|a| {
                    prices
                        .column(&columns[j])
                        .and_then(|b| engle_granger(a, b, self.settings.max_lag))
                });
                (i, j, result)
            })
            .collect();

        let mut found = Vec::new();
        for (i, j, result) in tested {
            match result {
                Ok(result) if result.is_cointegrated(self.settings.significance) => {
                    found.push(CointegratedPair {
                        first: columns[i].clone(),
                        second: columns[j].clone(),
                        result,
                    });
                }
                Ok(_) => {}
                Err(err @ RiskError::InvalidInput(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        parent: &self.span,
                        first = %columns[i],
                        second = %columns[j],
                        %err,
                        "pair test failed, treating as not cointegrated"
                    );
                }
            }
        }

        for pair in &found {
            info!(
                parent: &self.span,
                first = %pair.first,
                second = %pair.second,
                p_value = pair.result.p_value,
                "cointegrated pair found"
            );
        }
        debug!(parent: &self.span, tested = pairs.len(), found = found.len(), "pair scan complete");
        Ok(found)
    }

    /// Test, spread, z-score and signals for one pair of columns.
    pub fn analyze_pair(&self, prices: &Panel, first: &str, second: &str) -> Result<PairAnalysis> {
        let a = prices.column(first)?;
        let b = prices.column(second)?;
        let result = engle_granger(a, b, self.settings.max_lag)?;
        let spread = match self.settings.spread {
            SpreadKind::Simple => spread(a, b)?,
            SpreadKind::Hedged => hedged_spread(a, b, result.hedge_ratio)?,
        };
        let z = z_score(&spread, self.settings.z_score)?;
        let signals = generate_signals(
            &z,
            self.settings.entry_threshold,
            self.settings.exit_threshold,
            self.settings.mode,
        );
        info!(
            parent: &self.span,
            first,
            second,
            p_value = result.p_value,
            "pair analyzed"
        );
        Ok(PairAnalysis {
            pair: CointegratedPair {
                first: first.to_string(),
                second: second.to_string(),
                result,
            },
            spread,
            z_score: z,
            signals: SignalSeries {
                index: prices.index().to_vec(),
                signals,
            },
        })
    }
}
