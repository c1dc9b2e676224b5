use credit_sim_core::amortization::schedule::{LoanScheduleEntry, LoanTerms, RedemptionScheme};
use credit_sim_core::simulation::config::{
    CorrelationInputs, CorrelationMatrix, DebtorInput, LoanInput, PortfolioRequest,
    SimulationConfig,
};
use credit_sim_core::simulation::observer::MetricsObserver;
use credit_sim_core::simulation::orchestrator::{run_portfolio_simulation, SimulationOrchestrator};
use credit_sim_core::simulation::shocks::ShockMode;
use credit_sim_core::CreditSimError;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

// ===========================================================================
// Fixtures
// ===========================================================================

fn debtor(id: &str, sector: &str, property: &str) -> DebtorInput {
    DebtorInput {
        config: SimulationConfig {
            debtor_id: id.into(),
            initial_revenue: 1_000_000.0,
            initial_operating_costs: 800_000.0,
            initial_liquid_assets: 50_000.0,
            initial_total_assets: 2_000_000.0,
            initial_equity: 1_000_000.0,
            initial_debt: 1_000_000.0,
            revenue_growth: 0.0,
            revenue_volatility: 0.0,
            operating_cost_growth: 0.0,
            operating_cost_volatility: 0.0,
            tax_rate: 0.25,
            sector_weights: BTreeMap::from([(sector.to_string(), 1.0)]),
            simulation_years: 3,
            num_simulations: 10,
            collateral_expected_return: 0.0,
            collateral_volatility: 0.1,
        },
        loans: vec![LoanInput {
            loan_id: 1,
            principal: 1_000_000.0,
            collateral_value: 600_000.0,
            liquidity_haircut_pct: 20.0,
            subordination: 0.0,
            property_type: Some(property.into()),
            collateral_expected_return: None,
            schedule: Vec::new(),
            terms: Some(LoanTerms {
                annual_rate: dec!(0.05),
                tenor_months: 120,
                interest_only_months: 0,
                scheme: RedemptionScheme::Linear,
            }),
        }],
    }
}

fn request(rho: Option<f64>) -> PortfolioRequest {
    let sectors = vec!["A".to_string(), "B".to_string()];
    PortfolioRequest {
        debtors: vec![debtor("alpha", "A", "office"), debtor("beta", "B", "retail")],
        correlation: CorrelationInputs {
            sector_correlation: rho.map(|r| CorrelationMatrix::uniform(sectors, r)),
            sector_volatility: BTreeMap::from([("A".to_string(), 0.25), ("B".to_string(), 0.25)]),
            ..CorrelationInputs::default()
        },
        default_sector_volatility: 0.15,
        num_simulations: 2_000,
        simulation_years: 5,
        seed: Some(7),
    }
}

// ===========================================================================
// Joint default behaviour
// ===========================================================================

#[test]
fn test_perfect_correlation_raises_joint_defaults() {
    let correlated = run_portfolio_simulation(&request(Some(1.0))).unwrap();
    let independent = run_portfolio_simulation(&request(Some(0.0))).unwrap();

    let c = &correlated.result.statistics;
    let i = &independent.result.statistics;
    assert!(c.debtors[0].probability_of_default > 0.0);
    assert!(c.debtors[0].probability_of_default < 100.0);
    assert!(
        c.joint_default_probability > i.joint_default_probability,
        "rho=1: {} rho=0: {}",
        c.joint_default_probability,
        i.joint_default_probability
    );
    assert!(c.diversification_benefit < i.diversification_benefit);
}

#[test]
fn test_identical_debtors_on_shared_shocks_default_together() {
    let out = run_portfolio_simulation(&request(Some(1.0))).unwrap();
    let s = &out.result.statistics;
    assert_eq!(s.debtors[0].defaults, s.debtors[1].defaults);
    assert_eq!(s.joint_default_probability, s.portfolio_default_probability);
    assert!((s.joint_default_probability - s.debtors[0].probability_of_default).abs() < 1e-9);
}

#[test]
fn test_portfolio_expected_loss_is_sum_of_debtors() {
    let out = run_portfolio_simulation(&request(Some(0.3))).unwrap();
    let s = &out.result.statistics;
    let sum: f64 = s.debtors.iter().map(|d| d.expected_loss).sum();
    assert!((s.expected_loss - sum).abs() < 1e-6);
    for d in &s.debtors {
        assert_eq!(d.expected_loss, d.probability_of_default / 100.0 * d.average_lgd);
    }
    assert!(s.loss_distribution.p50 <= s.loss_distribution.p95);
    assert!(s.loss_distribution.p95 <= s.loss_distribution.p99);
    assert!(s.loss_distribution.p99 <= s.loss_distribution.max);
}

// ===========================================================================
// Run shape and concentration
// ===========================================================================

#[test]
fn test_portfolio_overrides_debtor_horizon() {
    let out = run_portfolio_simulation(&request(Some(0.5))).unwrap();
    let s = &out.result.statistics;
    assert_eq!(s.num_simulations, 2_000);
    for d in &s.debtors {
        assert_eq!(d.years.len(), 5);
        assert_eq!(d.num_paths, 2_000);
    }
}

#[test]
fn test_concentration_metrics() {
    let out = run_portfolio_simulation(&request(Some(0.5))).unwrap();
    let s = &out.result.statistics;
    assert_eq!(s.total_nominal, 2_000_000.0);
    assert!((s.sector_concentration.hhi - 0.5).abs() < 1e-12);
    assert!((s.sector_concentration.effective_number - 2.0).abs() < 1e-9);
    assert_eq!(s.property_type_concentration.entries.len(), 2);
}

#[test]
fn test_missing_matrix_falls_back_to_independent() {
    let out = run_portfolio_simulation(&request(None)).unwrap();
    assert_eq!(out.result.shock_mode, ShockMode::Independent);
    assert!(out.warnings.iter().any(|w| w.contains("independently")));
}

#[test]
fn test_sequential_matches_default_execution() {
    let req = request(Some(0.4));
    let a = SimulationOrchestrator::new().run_portfolio(&req).unwrap();
    let b = SimulationOrchestrator::new()
        .force_sequential(true)
        .run_portfolio(&req)
        .unwrap();
    assert_eq!(
        serde_json::to_value(&a.result.statistics).unwrap(),
        serde_json::to_value(&b.result.statistics).unwrap()
    );
}

#[test]
fn test_differing_collateral_volatility_warns_on_mean_fallback() {
    let mut req = request(Some(0.3));
    req.debtors[1].config.collateral_volatility = 0.3;
    let out = run_portfolio_simulation(&req).unwrap();
    let warning = out
        .warnings
        .iter()
        .find(|w| w.contains("portfolio mean"))
        .expect("mean fallback warning");
    assert!(warning.contains("2 collateral type(s)"), "{warning}");
    assert!(warning.contains("0.2000"), "{warning}");

    // Explicit per-type volatilities leave nothing to fall back on
    req.correlation.collateral_volatility =
        BTreeMap::from([("office".to_string(), 0.1), ("retail".to_string(), 0.3)]);
    let out = run_portfolio_simulation(&req).unwrap();
    assert!(!out.warnings.iter().any(|w| w.contains("portfolio mean")));

    // Equal debtor volatilities make the mean exact
    let out = run_portfolio_simulation(&request(Some(0.3))).unwrap();
    assert!(!out.warnings.iter().any(|w| w.contains("portfolio mean")));
}

// ===========================================================================
// Non-finite paths
// ===========================================================================

/// Debtor whose idiosyncratic revenue overflows f64 after two rising years.
fn runaway(id: &str) -> DebtorInput {
    let mut d = debtor(id, "A", "office");
    d.config.sector_weights.clear();
    d.config.revenue_volatility = 1e200;
    d.loans.clear();
    d
}

#[test]
fn test_non_finite_debtor_paths_drop_joint_outcomes() {
    let mut req = request(Some(0.3));
    req.num_simulations = 400;
    req.debtors[1] = runaway("runaway");
    let metrics = Arc::new(MetricsObserver::new());
    let out = SimulationOrchestrator::new()
        .with_observer(metrics.clone())
        .run_portfolio(&req)
        .unwrap();

    let excluded = out.result.excluded_paths;
    assert!(excluded > 0 && excluded < 400, "excluded={excluded}");
    let s = &out.result.statistics;
    // Only complete simulations enter the joint outcomes
    assert_eq!(s.num_simulations, 400 - excluded);
    assert_eq!(s.debtors[0].num_paths, 400);
    assert_eq!(s.debtors[1].num_paths, 400 - excluded);
    assert!(out
        .warnings
        .iter()
        .any(|w| w.contains(&format!("{excluded} debtor paths excluded"))));

    let snap = metrics.snapshot();
    assert_eq!(snap.paths_excluded as usize, excluded);
    assert_eq!(snap.paths_completed as usize, 800 - excluded);
}

#[test]
fn test_debtor_non_finite_on_every_path_is_insufficient_data() {
    let mut req = request(Some(0.3));
    req.num_simulations = 50;
    // Interest of two loans at 1e308 sums to infinity
    let mut broken = debtor("broken", "B", "retail");
    let template = broken.loans[0].clone();
    broken.loans = (1..=2)
        .map(|id| LoanInput {
            loan_id: id,
            terms: None,
            schedule: (1..=5)
                .map(|year| LoanScheduleEntry {
                    year,
                    interest_expense: 1e308,
                    redemption_amount: 0.0,
                    outstanding_balance: 1_000_000.0,
                })
                .collect(),
            ..template.clone()
        })
        .collect();
    req.debtors[1] = broken;

    let metrics = Arc::new(MetricsObserver::new());
    let err = SimulationOrchestrator::new()
        .with_observer(metrics.clone())
        .run_portfolio(&req)
        .unwrap_err();
    assert!(matches!(err, CreditSimError::InsufficientData(_)));

    let snap = metrics.snapshot();
    assert_eq!(snap.paths_excluded, 50);
    assert_eq!(snap.paths_completed, 50);
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn test_empty_portfolio_rejected() {
    let mut req = request(None);
    req.debtors.clear();
    assert!(matches!(
        run_portfolio_simulation(&req),
        Err(CreditSimError::InsufficientData(_))
    ));
}

#[test]
fn test_malformed_matrix_rejected() {
    let mut req = request(None);
    req.correlation.sector_correlation = Some(CorrelationMatrix {
        labels: vec!["A".into(), "B".into()],
        values: vec![vec![1.0, 0.2]],
    });
    assert!(matches!(
        run_portfolio_simulation(&req),
        Err(CreditSimError::InvalidCorrelation(_))
    ));
}

#[test]
fn test_bad_sector_weights_rejected() {
    let mut req = request(Some(0.2));
    req.debtors[1]
        .config
        .sector_weights
        .insert("A".to_string(), 0.5);
    assert!(matches!(
        run_portfolio_simulation(&req),
        Err(CreditSimError::InvalidInput { .. })
    ));
}
