//! Quantitative risk engine.
//!
//! Risk and performance metrics over return series, trade gating against
//! rate, position and trade-count limits, maximum-Sharpe portfolio
//! optimization, cointegration-based pairs signals, scenario stress tests
//! and an append-only compliance log.

pub mod audit;
pub mod config;
pub mod error;
pub mod math;
pub mod metrics;
pub mod models;
pub mod risk;
pub mod series;
pub mod utils;

pub use audit::{ComplianceChecker, ComplianceLog, ComplianceLogEntry, ComplianceStatus, RiskAlert, RiskLimitsAlerts};
pub use config::EngineConfig;
pub use error::{Result, RiskError};
pub use models::{CointegrationResult, Signal, SignalMode, StatArbSettings, StatisticalArbitrageEngine};
pub use risk::{
    ConfidenceLevel, ConstraintEnforcer, GateDecision, OptimizedPortfolio, Portfolio, PortfolioOptimizer,
    RiskMetricsEngine, Scenario, ScenarioEngine, SlidingWindowThrottle, TradeLimitGate, TradeRequest, VaRMethod,
};
pub use series::{Panel, ReturnSeries, ReturnsMatrix};
pub use utils::{Clock, ManualClock, MonotonicClock};
