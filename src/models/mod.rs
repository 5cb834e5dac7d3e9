//! Statistical models for pairs trading.

pub mod cointegration;
pub mod statistical_arbitrage;

pub use cointegration::*;
pub use statistical_arbitrage::*;
