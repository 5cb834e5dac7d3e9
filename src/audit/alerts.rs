//! Threshold alerts over named risk factors.

use crate::risk::RiskLimits;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub timestamp: DateTime<Utc>,
    pub risk_factor: String,
    pub value: f64,
    pub limit: f64,
    pub message: String,
}

pub struct RiskLimitsAlerts {
    limits: RiskLimits,
    alerts: Mutex<Vec<RiskAlert>>,
    span: tracing::Span,
}

impl RiskLimitsAlerts {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            alerts: Mutex::new(Vec::new()),
            span: tracing::info_span!("risk_alerts"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Compare observed factors with their limits. Factors without a limit
    /// are ignored; a value strictly above its limit raises an alert.
    pub fn check_risk_limits(&self, observed: &BTreeMap<String, f64>) -> Vec<RiskAlert> {
        let mut raised = Vec::new();
        for (factor, value) in observed {
            let Some(limit) = self.limits.get(factor).copied() else {
                continue;
            };
            if *value > limit {
                let alert = RiskAlert {
                    timestamp: Utc::now(),
                    risk_factor: factor.clone(),
                    value: *value,
                    limit,
                    message: format!(
                        "Risk limit breached for {factor}: {value} exceeds limit of {limit}"
                    ),
                };
                warn!(parent: &self.span, risk_factor = %factor, value, limit, "risk limit alert");
                raised.push(alert);
            } else {
                debug!(parent: &self.span, risk_factor = %factor, value, limit, "risk factor within limit");
            }
        }
        self.alerts.lock().extend(raised.iter().cloned());
        raised
    }

    /// Every alert raised so far.
    pub fn alerts(&self) -> Vec<RiskAlert> {
        self.alerts.lock().clone()
    }
}
