use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use quant_risk_engine::models::{CointegratedPair, StatisticalArbitrageEngine};
use quant_risk_engine::risk::{OptimizedPortfolio, PortfolioOptimizer, RiskMetricsEngine, RiskReport};
use quant_risk_engine::{EngineConfig, Panel, RiskAlert, RiskError, RiskLimitsAlerts};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn, Level};

#[derive(Debug, Serialize)]
struct BatchReport {
    observations: usize,
    assets: BTreeMap<String, RiskReport>,
    /// Assets whose metrics could not be computed, with the reason.
    failed_assets: BTreeMap<String, String>,
    portfolio: OptimizedPortfolio,
    optimizer_fallback: bool,
    cointegrated_pairs: Vec<CointegratedPair>,
    alerts: Vec<RiskAlert>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("usage: quant-risk-engine <prices.csv> [config.toml]");
        std::process::exit(2);
    }

    let mut config = match args.get(2) {
        Some(path) => EngineConfig::from_toml(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;

    let prices = load_price_panel(&args[1])?;
    info!(rows = prices.len(), assets = prices.columns().len(), "loaded price panel");

    let report = run(&prices, &config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run(prices: &Panel, config: &EngineConfig) -> Result<BatchReport, Box<dyn Error>> {
    let alerts = RiskLimitsAlerts::new(config.risk_limits.clone());
    let mut assets = BTreeMap::new();
    let mut failed_assets = BTreeMap::new();
    for asset in prices.columns() {
        let report = match asset_report(prices, asset, config) {
            Ok(report) => report,
            Err(err) => {
                warn!(%asset, %err, "skipping asset metrics");
                failed_assets.insert(asset.clone(), err.to_string());
                continue;
            }
        };

        let observed = BTreeMap::from([
            (format!("{asset}.annualized_volatility"), report.annualized_volatility),
            (format!("{asset}.max_drawdown"), -report.max_drawdown),
            (format!("{asset}.historical_var"), -report.historical_var),
        ]);
        alerts.check_risk_limits(&observed);
        assets.insert(asset.clone(), report);
    }

    let returns = prices.returns_matrix()?;
    let optimizer = PortfolioOptimizer::new(config.optimizer);
    let (portfolio, optimizer_fallback) = match optimizer.optimize(&returns) {
        Ok(portfolio) => (portfolio, false),
        Err(err) => {
            warn!(%err, "falling back to equal weights");
            (OptimizedPortfolio::equal_weight(&returns, &config.optimizer)?, true)
        }
    };

    let cointegrated_pairs = StatisticalArbitrageEngine::new(config.stat_arb)?.find_cointegrated_pairs(prices)?;

    Ok(BatchReport {
        observations: returns.periods(),
        assets,
        failed_assets,
        portfolio,
        optimizer_fallback,
        cointegrated_pairs,
        alerts: alerts.alerts(),
    })
}

fn asset_report(prices: &Panel, asset: &str, config: &EngineConfig) -> Result<RiskReport, RiskError> {
    RiskMetricsEngine::new(prices.pct_change(asset)?, config.metrics)?
        .with_span(tracing::info_span!("metrics", asset = %asset))
        .report(config.confidence)
}

/// `timestamp,ASSET1,ASSET2,...` with RFC 3339 timestamps.
fn load_price_panel<P: AsRef<Path>>(path: P) -> Result<Panel, Box<dyn Error>> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(file);

    let headers = reader.headers()?.clone();
    let assets: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    if assets.is_empty() {
        return Err("price file needs a timestamp column and at least one asset column".into());
    }

    let mut index = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); assets.len()];
    for result in reader.records() {
        let record = result?;
        let timestamp = DateTime::parse_from_rfc3339(&record[0])?.with_timezone(&Utc);
        index.push(timestamp);
        for (column, field) in columns.iter_mut().zip(record.iter().skip(1)) {
            column.push(field.parse::<f64>()?);
        }
    }

    let mut panel = Panel::new(index)?;
    for (asset, values) in assets.into_iter().zip(columns) {
        panel.insert(asset, values)?;
    }
    Ok(panel)
}
