use approx::assert_relative_eq;
use quant_risk_engine::risk::{DiversificationAnalyzer, OptimizedPortfolio, OptimizerSettings, PortfolioOptimizer};
use quant_risk_engine::{Panel, ReturnsMatrix};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn price_panel(seed: u64) -> Panel {
    let mut rng = StdRng::seed_from_u64(seed);
    let assets = [("ALPHA", 0.0008, 0.010), ("BETA", 0.0004, 0.020), ("GAMMA", 0.0002, 0.015)];
    let n = 300;
    let mut panel = Panel::with_len(n);
    for (name, drift, vol) in assets {
        let shock = Normal::new(drift, vol).unwrap();
        let mut price = 100.0;
        let prices = (0..n)
            .map(|_| {
                price *= 1.0 + shock.sample(&mut rng);
                price
            })
            .collect();
        panel.insert(name, prices).unwrap();
    }
    panel
}

#[test]
fn test_weights_are_a_valid_allocation() {
    for seed in 0..5 {
        let returns = price_panel(seed).returns_matrix().unwrap();
        let settings = OptimizerSettings::default();
        let optimized = match PortfolioOptimizer::new(settings).optimize(&returns) {
            Ok(portfolio) => portfolio,
            Err(err) => panic!("seed {seed}: {err}"),
        };

        assert_relative_eq!(optimized.weights.values().sum::<f64>(), 1.0, epsilon = 1e-6);
        assert!(optimized.weights.values().all(|w| (0.0..=1.0).contains(w)));

        let equal = OptimizedPortfolio::equal_weight(&returns, &settings).unwrap();
        assert!(optimized.sharpe_ratio >= equal.sharpe_ratio - 1e-9);
    }
}

#[test]
fn test_risk_free_rate_lowers_sharpe() {
    let returns = price_panel(1).returns_matrix().unwrap();
    let base = PortfolioOptimizer::new(OptimizerSettings::default()).optimize(&returns).unwrap();
    let with_rf = PortfolioOptimizer::new(OptimizerSettings {
        risk_free_rate: 0.02,
        ..Default::default()
    })
    .optimize(&returns)
    .unwrap();
    assert!(with_rf.sharpe_ratio < base.sharpe_ratio);
}

#[test]
fn test_risk_parity_favours_low_volatility() {
    let returns = price_panel(3).returns_matrix().unwrap();
    let allocation = DiversificationAnalyzer::new().risk_parity(&returns).unwrap();
    assert_relative_eq!(allocation.weights.values().sum::<f64>(), 1.0, epsilon = 1e-12);
    assert!(allocation.weights["ALPHA"] > allocation.weights["GAMMA"]);
    assert!(allocation.weights["GAMMA"] > allocation.weights["BETA"]);
}

#[test]
fn test_single_asset_takes_full_weight() {
    let returns = ReturnsMatrix::from_columns(vec![("ONLY".to_string(), vec![0.01, -0.02, 0.015, 0.003])]).unwrap();
    let optimized = PortfolioOptimizer::new(OptimizerSettings::default()).optimize(&returns).unwrap();
    assert_relative_eq!(optimized.weights["ONLY"], 1.0);
}
