use std::time::Duration;
use thiserror::Error;

/// Errors produced by the risk engine.
///
/// Limit breaches are not errors: trade gates return decisions and
/// compliance checks return outcomes. The only breach-shaped variant,
/// [`RiskError::ComplianceBreach`], is produced when a caller explicitly
/// asks for a failed check to be enforced.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("{metric}: {reason} (n = {len})")]
    Domain {
        metric: &'static str,
        reason: String,
        len: usize,
    },

    #[error("Invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{metric}: length mismatch ({left} vs {right})")]
    LengthMismatch {
        metric: &'static str,
        left: usize,
        right: usize,
    },

    #[error("Benchmark index does not match returns index at position {position}")]
    IndexMismatch { position: usize },

    #[error("Missing column '{column}' (available: {available:?})")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("{metric} requires a benchmark series")]
    MissingBenchmark { metric: &'static str },

    #[error("No limits configured for asset {asset}")]
    MissingLimit { asset: String },

    #[error("Rate limit exceeded for {asset}: {limit} requests per {window:?}, retry after {retry_after:?}")]
    RateLimitExceeded {
        asset: String,
        limit: usize,
        window: Duration,
        retry_after: Duration,
    },

    #[error("Timed out after {waited:?} waiting for a rate slot on {asset}")]
    SlotWaitTimeout { asset: String, waited: Duration },

    #[error("Optimization failed for {assets} assets after {iterations} iterations: {reason}")]
    Optimization {
        reason: String,
        assets: usize,
        iterations: usize,
    },

    #[error("Matrix operation failed: {0}")]
    Matrix(String),

    #[error("Compliance breach on {rule}: {details}")]
    ComplianceBreach { rule: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RiskError {
    pub(crate) fn domain(metric: &'static str, reason: impl Into<String>, len: usize) -> Self {
        RiskError::Domain {
            metric,
            reason: reason.into(),
            len,
        }
    }

    pub(crate) fn invalid_parameter(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        RiskError::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may wait and resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RiskError::RateLimitExceeded { .. } | RiskError::SlotWaitTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;
