//! Time-indexed series and panels supplied by the market-data collaborator.

use crate::error::{Result, RiskError};
use crate::risk::AssetId;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered periodic returns. Index order is chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    index: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl ReturnSeries {
    pub fn new(index: Vec<DateTime<Utc>>, values: Vec<f64>) -> Result<Self> {
        if index.len() != values.len() {
            return Err(RiskError::LengthMismatch {
                metric: "ReturnSeries::new",
                left: index.len(),
                right: values.len(),
            });
        }
        validate_index(&index)?;
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(RiskError::InvalidInput(format!(
                "non-finite return at position {pos}"
            )));
        }
        Ok(Self { index, values })
    }

    /// Series on a synthetic daily index starting at the Unix epoch.
    pub fn from_values(values: Vec<f64>) -> Result<Self> {
        let index = synthetic_index(values.len());
        Self::new(index, values)
    }

    /// Simple returns `p[i] / p[i-1] - 1`, indexed by the later timestamp.
    pub fn from_prices(index: &[DateTime<Utc>], prices: &[f64]) -> Result<Self> {
        if index.len() != prices.len() {
            return Err(RiskError::LengthMismatch {
                metric: "ReturnSeries::from_prices",
                left: index.len(),
                right: prices.len(),
            });
        }
        if let Some(pos) = prices.iter().position(|p| !(p.is_finite() && *p > 0.0)) {
            return Err(RiskError::InvalidInput(format!(
                "non-positive price at position {pos}"
            )));
        }
        let values = prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let index = index.iter().skip(1).copied().collect();
        Self::new(index, values)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns multiplied by `factor`, same index.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            index: self.index.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }
}

/// A timestamp index with named, equal-length `f64` columns.
///
/// Serves as a price panel (one column per asset) and as a single-asset
/// frame validated against a [`SeriesSchema`](crate::risk::SeriesSchema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    index: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
    order: Vec<String>,
}

impl Panel {
    pub fn new(index: Vec<DateTime<Utc>>) -> Result<Self> {
        validate_index(&index)?;
        Ok(Self {
            index,
            columns: BTreeMap::new(),
            order: Vec::new(),
        })
    }

    /// Panel on a synthetic daily index.
    pub fn with_len(len: usize) -> Self {
        Self {
            index: synthetic_index(len),
            columns: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Add or replace a column. Insertion order is kept for iteration.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(RiskError::LengthMismatch {
                metric: "Panel::insert",
                left: self.index.len(),
                right: values.len(),
            });
        }
        if !self.columns.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.insert(name, values)?;
        Ok(self)
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> &[String] {
        &self.order
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| RiskError::MissingColumn {
                column: name.to_string(),
                available: self.order.clone(),
            })
    }

    /// Simple returns of one column as a [`ReturnSeries`].
    pub fn pct_change(&self, name: &str) -> Result<ReturnSeries> {
        ReturnSeries::from_prices(&self.index, self.column(name)?)
    }

    /// Column values as a [`ReturnSeries`] on the panel index.
    pub fn series(&self, name: &str) -> Result<ReturnSeries> {
        ReturnSeries::new(self.index.clone(), self.column(name)?.to_vec())
    }

    /// Simple-return matrix of every column, one row shorter than the panel.
    pub fn returns_matrix(&self) -> Result<ReturnsMatrix> {
        let assets = self.order.clone();
        let returns = assets
            .iter()
            .map(|name| self.pct_change(name).map(|s| s.values().to_vec()))
            .collect::<Result<Vec<_>>>()?;
        let periods = self.len().saturating_sub(1);
        let data = DMatrix::from_fn(periods, assets.len(), |r, c| returns[c][r]);
        ReturnsMatrix::new(assets, data)
    }
}

/// Historical per-asset returns with assets as columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnsMatrix {
    assets: Vec<AssetId>,
    data: DMatrix<f64>,
}

impl ReturnsMatrix {
    pub fn new(assets: Vec<AssetId>, data: DMatrix<f64>) -> Result<Self> {
        if assets.len() != data.ncols() {
            return Err(RiskError::LengthMismatch {
                metric: "ReturnsMatrix::new",
                left: assets.len(),
                right: data.ncols(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(RiskError::InvalidInput(
                "returns matrix contains non-finite values".to_string(),
            ));
        }
        Ok(Self { assets, data })
    }

    /// Build from per-asset columns of equal length.
    pub fn from_columns(columns: Vec<(AssetId, Vec<f64>)>) -> Result<Self> {
        let periods = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, v)) = columns.iter().find(|(_, v)| v.len() != periods) {
            return Err(RiskError::InvalidInput(format!(
                "column {name} has {} periods, expected {periods}",
                v.len()
            )));
        }
        let data = DMatrix::from_fn(periods, columns.len(), |r, c| columns[c].1[r]);
        let assets = columns.into_iter().map(|(name, _)| name).collect();
        Self::new(assets, data)
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn periods(&self) -> usize {
        self.data.nrows()
    }

    /// Mean return per asset.
    pub fn mean_returns(&self) -> nalgebra::DVector<f64> {
        let n = self.periods().max(1) as f64;
        nalgebra::DVector::from_iterator(
            self.data.ncols(),
            self.data.column_iter().map(|c| c.sum() / n),
        )
    }

    /// Sample covariance matrix (n-1 denominator). Symmetric by construction.
    pub fn covariance(&self) -> DMatrix<f64> {
        let n = self.periods();
        let k = self.data.ncols();
        if n < 2 {
            return DMatrix::zeros(k, k);
        }
        let means = self.mean_returns();
        let centered = DMatrix::from_fn(n, k, |r, c| self.data[(r, c)] - means[c]);
        let cov = centered.transpose() * &centered / (n - 1) as f64;
        // Exact symmetry for downstream quadratic forms.
        (&cov + cov.transpose()) * 0.5
    }
}

fn validate_index(index: &[DateTime<Utc>]) -> Result<()> {
    if let Some(pos) = index.windows(2).position(|w| w[1] <= w[0]) {
        return Err(RiskError::InvalidInput(format!(
            "index is not strictly increasing at position {}",
            pos + 1
        )));
    }
    Ok(())
}

fn synthetic_index(len: usize) -> Vec<DateTime<Utc>> {
    let origin = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
    (0..len)
        .map(|i| origin + ChronoDuration::days(i as i64))
        .collect()
}
