//! Regulatory compliance predicates. Each check appends exactly one entry
//! to the shared [`ComplianceLog`].

use crate::audit::{ComplianceLog, ComplianceStatus};
use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const TRADE_VOLUME_RULE: &str = "Trade Volume Limit";
pub const POSITION_VALUE_RULE: &str = "Position Value Limit";
pub const MARGIN_RULE: &str = "Margin Requirement";
pub const REGULATORY_CAPITAL_RULE: &str = "Regulatory Capital Requirement";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceOutcome {
    pub rule: String,
    pub status: ComplianceStatus,
    pub details: String,
    pub sequence: u64,
}

impl ComplianceOutcome {
    pub fn passed(&self) -> bool {
        self.status == ComplianceStatus::Pass
    }

    /// Turn a failed check into [`RiskError::ComplianceBreach`].
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            ComplianceStatus::Pass => Ok(self),
            ComplianceStatus::Fail => Err(RiskError::ComplianceBreach {
                rule: self.rule,
                details: self.details,
            }),
        }
    }
}

pub struct ComplianceChecker {
    log: Arc<ComplianceLog>,
    span: tracing::Span,
}

impl ComplianceChecker {
    pub fn new(log: Arc<ComplianceLog>) -> Self {
        Self {
            log,
            span: tracing::info_span!("compliance"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn log(&self) -> &Arc<ComplianceLog> {
        &self.log
    }

    fn record(&self, rule: &str, passed: bool, details: String) -> ComplianceOutcome {
        let status = ComplianceStatus::from_passed(passed);
        let sequence = self.log.append(rule, status, details.clone());
        if passed {
            info!(parent: &self.span, rule, sequence, %details, "compliance check passed");
        } else {
            warn!(parent: &self.span, rule, sequence, %details, "compliance check failed");
        }
        ComplianceOutcome {
            rule: rule.to_string(),
            status,
            details,
            sequence,
        }
    }

    pub fn check_trade_limit(&self, trade_volume: f64, max_trade_volume: f64) -> ComplianceOutcome {
        self.record(
            TRADE_VOLUME_RULE,
            trade_volume <= max_trade_volume,
            format!("Trade volume: {trade_volume}, Limit: {max_trade_volume}"),
        )
    }

    pub fn check_position_limit(&self, position_value: f64, max_position_value: f64) -> ComplianceOutcome {
        self.record(
            POSITION_VALUE_RULE,
            position_value <= max_position_value,
            format!("Position value: {position_value}, Limit: {max_position_value}"),
        )
    }

    pub fn check_margin_requirement(&self, account_equity: f64, required_margin: f64) -> ComplianceOutcome {
        self.record(
            MARGIN_RULE,
            account_equity >= required_margin,
            format!("Account equity: {account_equity}, Required margin: {required_margin}"),
        )
    }

    pub fn check_regulatory_capital(&self, capital: f64, minimum_capital: f64) -> ComplianceOutcome {
        self.record(
            REGULATORY_CAPITAL_RULE,
            capital >= minimum_capital,
            format!("Capital: {capital}, Minimum capital: {minimum_capital}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_check_appends_one_entry() {
        let log = Arc::new(ComplianceLog::new());
        let checker = ComplianceChecker::new(Arc::clone(&log));

        assert!(checker.check_trade_limit(500.0, 1000.0).passed());
        assert!(checker.check_position_limit(200_000.0, 250_000.0).passed());
        assert!(checker.check_margin_requirement(150_000.0, 100_000.0).passed());
        assert!(!checker.check_regulatory_capital(200_000.0, 300_000.0).passed());

        let entries = log.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3].rule, REGULATORY_CAPITAL_RULE);
        assert_eq!(entries[3].status, ComplianceStatus::Fail);
        assert_eq!(entries[0].details, "Trade volume: 500, Limit: 1000");
    }

    #[test]
    fn test_boundaries_pass() {
        let checker = ComplianceChecker::new(Arc::new(ComplianceLog::new()));
        assert!(checker.check_trade_limit(1000.0, 1000.0).passed());
        assert!(checker.check_margin_requirement(100.0, 100.0).passed());
    }

    #[test]
    fn test_into_result() {
        let checker = ComplianceChecker::new(Arc::new(ComplianceLog::new()));
        assert!(checker.check_trade_limit(1.0, 2.0).into_result().is_ok());
        match checker.check_trade_limit(3.0, 2.0).into_result() {
            Err(RiskError::ComplianceBreach { rule, .. }) => assert_eq!(rule, TRADE_VOLUME_RULE),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
