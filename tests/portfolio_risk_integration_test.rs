use approx::assert_relative_eq;
use quant_risk_engine::audit::{ComplianceChecker, ComplianceLog, ComplianceStatus, RiskLimitsAlerts};
use quant_risk_engine::risk::{
    AssetLimits, BetaHedge, ConstraintEnforcer, CostRates, DiversificationAnalyzer, Fill, Portfolio,
    PortfolioRebalancer, PositionSizer, RiskLimits, Scenario, ScenarioEngine, StopLoss, TradeRequest,
    TransactionCostAnalyzer,
};
use quant_risk_engine::{ManualClock, RiskError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn book() -> Portfolio {
    Portfolio::from_pairs([
        ("Asset_A", 300_000.0),
        ("Asset_B", 200_000.0),
        ("Asset_C", 150_000.0),
        ("Asset_D", 250_000.0),
        ("Asset_E", 100_000.0),
    ])
    .unwrap()
}

#[test]
fn test_stress_results_feed_compliance_checks() {
    let scenarios = vec![
        Scenario::from_pairs("Mild", [("Asset_A", -5.0)]),
        Scenario::from_pairs(
            "Market Crash",
            [("Asset_A", -20.0), ("Asset_B", -25.0), ("Asset_C", -15.0), ("Asset_D", -30.0), ("Asset_E", -10.0)],
        ),
    ];
    let results = ScenarioEngine::new().stress_test(&book(), &scenarios).unwrap();
    assert_eq!(results[0].scenario, "Market Crash");
    assert_relative_eq!(results[0].total_impact, -217_500.0, epsilon = 1e-6);
    assert_relative_eq!(results[1].total_impact, -15_000.0, epsilon = 1e-6);

    let log = Arc::new(ComplianceLog::new());
    let checker = ComplianceChecker::new(Arc::clone(&log));
    let stressed_equity = results[0].new_total_value();

    let margin = checker.check_margin_requirement(stressed_equity, 800_000.0);
    assert!(!margin.passed());
    let capital = checker.check_regulatory_capital(stressed_equity, 500_000.0);
    assert!(capital.passed());
    let position = checker.check_position_limit(300_000.0, 250_000.0);
    assert!(matches!(position.into_result(), Err(RiskError::ComplianceBreach { .. })));

    let entries = log.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(entries[1].status, ComplianceStatus::Pass);
    assert_eq!(log.failures().len(), 2);
    assert_eq!(entries[2].details, "Position value: 300000, Limit: 250000");
}

#[test]
fn test_risk_limit_alerts() {
    let limits: RiskLimits = BTreeMap::from([("volatility".to_string(), 0.2), ("var".to_string(), 0.05)]);
    let alerts = RiskLimitsAlerts::new(limits);

    let observed = BTreeMap::from([
        ("volatility".to_string(), 0.25),
        ("var".to_string(), 0.05),
        ("beta".to_string(), 3.0),
    ]);
    let raised = alerts.check_risk_limits(&observed);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].risk_factor, "volatility");
    assert_eq!(
        raised[0].message,
        "Risk limit breached for volatility: 0.25 exceeds limit of 0.2"
    );

    alerts.check_risk_limits(&BTreeMap::from([("var".to_string(), 0.06)]));
    assert_eq!(alerts.alerts().len(), 2);
}

#[test]
fn test_hedge_sizing_and_concentration() {
    let benchmark = [0.01, -0.015, 0.02, -0.005, 0.012, -0.01, 0.004];
    let portfolio_returns: Vec<f64> = benchmark.iter().map(|b| 1.25 * b + 0.001).collect();
    let hedge = BetaHedge::new(&portfolio_returns, &benchmark).unwrap();
    assert_relative_eq!(hedge.hedge_ratio(), -1.25, epsilon = 1e-12);

    let book = book();
    let units = hedge.hedge_units(book.total_value(), 2_000.0).unwrap();
    assert_relative_eq!(units, -625.0, epsilon = 1e-9);

    let report = DiversificationAnalyzer::new().assess(&book, None).unwrap();
    assert_relative_eq!(report.herfindahl_index, 0.225, epsilon = 1e-12);
    assert!(report.diversification_ratio.is_none());

    let sizer = PositionSizer::new(0.01, book.total_value()).unwrap();
    let size = sizer.calculate_position_size(50.0).unwrap();
    assert_relative_eq!(size, 200.0);
    assert!(sizer.assess_position_size(size, 100.0));
}

#[test]
fn test_rebalance_trades_pass_the_gate_and_are_costed() {
    let targets = BTreeMap::from([
        ("Asset_A".to_string(), 0.2),
        ("Asset_B".to_string(), 0.3),
        ("Asset_C".to_string(), 0.2),
        ("Asset_D".to_string(), 0.2),
        ("Asset_E".to_string(), 0.1),
    ]);
    let plan = PortfolioRebalancer::new().plan(&book(), &targets).unwrap();
    let prices: BTreeMap<String, f64> = ["Asset_A", "Asset_B", "Asset_C", "Asset_D", "Asset_E"]
        .iter()
        .map(|a| (a.to_string(), 100.0))
        .collect();
    let requests = plan.trade_requests(&prices, 1.0).unwrap();
    // Asset_E is already on target.
    assert_eq!(requests.len(), 4);

    let limits: HashMap<String, AssetLimits> = prices
        .keys()
        .map(|a| (a.clone(), AssetLimits { position_limit: 800.0, trade_limit: 10 }))
        .collect();
    let enforcer = ConstraintEnforcer::new(limits, Default::default(), Arc::new(ManualClock::new())).unwrap();
    let decisions: Vec<_> = requests.iter().map(|r| enforcer.evaluate(r).unwrap()).collect();
    // Selling 1000 Asset_A and buying 1000 Asset_B both break the 800-unit limit.
    let denied: Vec<&str> = decisions
        .iter()
        .filter(|d| !d.allowed)
        .map(|d| d.asset.as_str())
        .collect();
    assert_eq!(denied, vec!["Asset_A", "Asset_B"]);

    let fills: Vec<Fill> = requests
        .iter()
        .zip(&decisions)
        .filter(|(_, d)| d.allowed)
        .map(|(r, _)| Fill::from_request(r, 100.0))
        .collect();
    let costs = TransactionCostAnalyzer::new(CostRates::default())
        .unwrap()
        .analyze(&fills)
        .unwrap();
    // Traded notional 50k + 50k at 35 bp.
    assert_eq!(costs.trades.len(), 2);
    assert_relative_eq!(costs.total_cost, 350.0, epsilon = 1e-6);
}

#[test]
fn test_stop_loss_exit_goes_through_the_gate() {
    let stop = StopLoss::new(10.0).unwrap();
    let level = stop.set_stop_loss(2_000.0).unwrap();
    let limits = HashMap::from([("ETH".to_string(), AssetLimits { position_limit: 10.0, trade_limit: 10 })]);
    let enforcer = ConstraintEnforcer::new(limits, Default::default(), Arc::new(ManualClock::new())).unwrap();
    assert!(enforcer.evaluate(&TradeRequest::new("ETH", 4.0)).unwrap().allowed);

    assert!(stop.exit("ETH", enforcer.position("ETH"), 1_850.0, level).is_none());
    let exit = stop.exit("ETH", enforcer.position("ETH"), 1_790.0, level).unwrap();
    assert!(enforcer.evaluate(&exit.request).unwrap().allowed);
    assert_eq!(enforcer.position("ETH"), 0.0);
}
