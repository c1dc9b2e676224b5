use credit_sim_core::amortization::schedule::{LoanScheduleEntry, LoanTerms, RedemptionScheme};
use credit_sim_core::simulation::cancellation::CancellationToken;
use credit_sim_core::simulation::config::{
    CorrelationInputs, LoanInput, SimulationConfig, SimulationRequest,
};
use credit_sim_core::simulation::debtor::{DebtorSimulator, YearResult};
use credit_sim_core::simulation::observer::MetricsObserver;
use credit_sim_core::simulation::orchestrator::{run_simulation, SimulationOrchestrator};
use credit_sim_core::simulation::shocks::{ShockGenerator, ShockMode};
use credit_sim_core::statistics::aggregator::percentile;
use credit_sim_core::CreditSimError;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

const SEED: u64 = 42;

// ===========================================================================
// Fixtures
// ===========================================================================

fn base_config() -> SimulationConfig {
    SimulationConfig {
        debtor_id: "acme-bv".into(),
        initial_revenue: 1_000_000.0,
        initial_operating_costs: 700_000.0,
        initial_liquid_assets: 100_000.0,
        initial_total_assets: 3_000_000.0,
        initial_equity: 2_500_000.0,
        initial_debt: 500_000.0,
        revenue_growth: 0.0,
        revenue_volatility: 0.0,
        operating_cost_growth: 0.0,
        operating_cost_volatility: 0.0,
        tax_rate: 0.25,
        sector_weights: BTreeMap::new(),
        simulation_years: 10,
        num_simulations: 200,
        collateral_expected_return: 0.0,
        collateral_volatility: 0.0,
    }
}

fn loan(id: i64, principal: f64, terms: LoanTerms) -> LoanInput {
    LoanInput {
        loan_id: id,
        principal,
        collateral_value: 0.0,
        liquidity_haircut_pct: 0.0,
        subordination: 0.0,
        property_type: None,
        collateral_expected_return: None,
        schedule: Vec::new(),
        terms: Some(terms),
    }
}

fn interest_only(rate: rust_decimal::Decimal, months: u32) -> LoanTerms {
    LoanTerms {
        annual_rate: rate,
        tenor_months: months,
        interest_only_months: months,
        scheme: RedemptionScheme::Bullet,
    }
}

fn stressed_request() -> SimulationRequest {
    let mut config = base_config();
    config.revenue_volatility = 0.5;
    config.simulation_years = 20;
    config.num_simulations = 5_000;
    config.initial_debt = 2_000_000.0;

    let mut l = loan(
        1,
        2_000_000.0,
        LoanTerms {
            annual_rate: dec!(0.06),
            tenor_months: 240,
            interest_only_months: 0,
            scheme: RedemptionScheme::Annuity,
        },
    );
    l.collateral_value = 1_200_000.0;
    l.liquidity_haircut_pct = 30.0;
    SimulationRequest {
        config,
        loans: vec![l],
        correlation: CorrelationInputs::default(),
        seed: Some(SEED),
    }
}

// ===========================================================================
// Deterministic debtor
// ===========================================================================

#[test]
fn test_zero_volatility_debtor_is_deterministic() {
    let request = SimulationRequest {
        config: base_config(),
        loans: vec![loan(1, 500_000.0, interest_only(dec!(0.05), 120))],
        correlation: CorrelationInputs::default(),
        seed: Some(SEED),
    };
    let out = run_simulation(&request).unwrap();
    let stats = &out.result.statistics;

    assert_eq!(stats.probability_of_default, 0.0);
    assert_eq!(stats.defaults, 0);
    assert_eq!(stats.years.len(), 10);
    for year in &stats.years {
        assert_eq!(year.ebitda.p5, 300_000.0);
        assert_eq!(year.ebitda.p95, 300_000.0);
        assert_eq!(year.equity.p5, year.equity.p95);
    }

    let samples = stats.sample_paths.as_ref().unwrap();
    for y in &samples.median.years {
        assert!((y.interest_expense - 25_000.0).abs() < 1e-6);
    }
    let strip = |ys: &[YearResult]| ys.to_vec();
    assert_eq!(strip(&samples.worst.years), strip(&samples.best.years));
}

#[test]
fn test_seeded_reproducibility() {
    let mut request = stressed_request();
    request.config.num_simulations = 500;
    let a = run_simulation(&request).unwrap();
    let b = run_simulation(&request).unwrap();
    assert_eq!(
        a.result.statistics.probability_of_default,
        b.result.statistics.probability_of_default
    );
    assert_eq!(a.result.statistics.expected_loss, b.result.statistics.expected_loss);
    assert_eq!(a.assumptions["seed"], serde_json::json!(SEED));
}

#[test]
fn test_unseeded_run_reports_its_seed() {
    let mut request = stressed_request();
    request.seed = None;
    request.config.num_simulations = 50;
    let out = run_simulation(&request).unwrap();
    assert!(out.assumptions["seed"].is_u64());
}

// ===========================================================================
// Stressed debtor
// ===========================================================================

#[test]
fn test_high_volatility_produces_defaults() {
    let request = stressed_request();
    let out = run_simulation(&request).unwrap();
    let stats = &out.result.statistics;

    assert!(stats.probability_of_default > 0.0, "pd={}", stats.probability_of_default);
    assert!(stats.average_lgd >= 0.0);
    assert!(stats.average_lgd <= 2_000_000.0);
    assert!(stats.median_lgd >= 0.0 && stats.median_lgd <= 2_000_000.0);

    let worst = &stats.sample_paths.as_ref().unwrap().worst;
    assert!(worst.default_occurred);
    assert!(worst.loss_given_default <= worst.exposure_at_default);
    assert!(worst.exposure_at_default <= 2_000_000.0 + 1e-6);
}

#[test]
fn test_expected_loss_identity_holds() {
    let out = run_simulation(&stressed_request()).unwrap();
    let s = &out.result.statistics;
    assert_eq!(s.expected_loss, s.probability_of_default / 100.0 * s.average_lgd);
}

#[test]
fn test_cumulative_default_probability_monotone() {
    let out = run_simulation(&stressed_request()).unwrap();
    let years = &out.result.statistics.years;
    for pair in years.windows(2) {
        assert!(pair[1].cumulative_default_probability >= pair[0].cumulative_default_probability);
    }
    let last = years.last().unwrap();
    assert!(
        (last.cumulative_default_probability - out.result.statistics.probability_of_default).abs()
            < 1e-9
    );
}

#[test]
fn test_percentile_bands_ordered() {
    let out = run_simulation(&stressed_request()).unwrap();
    for y in &out.result.statistics.years {
        for b in [&y.revenue, &y.ebitda, &y.equity, &y.debt, &y.liquid_assets] {
            assert!(b.p5 <= b.p10 && b.p10 <= b.p50 && b.p50 <= b.p90 && b.p90 <= b.p95);
        }
    }
}

#[test]
fn test_defaulted_paths_frozen_after_default() {
    let request = stressed_request();
    let config = SimulationConfig {
        num_simulations: 300,
        ..request.config.clone()
    };
    let schedules: Vec<_> = request
        .loans
        .iter()
        .map(|l| {
            credit_sim_core::amortization::schedule::build_loan_schedule(
                rust_decimal::Decimal::from_f64_retain(l.principal).unwrap(),
                l.terms.as_ref().unwrap(),
                config.simulation_years,
            )
            .unwrap()
        })
        .collect();
    let shocks = ShockGenerator::new(SEED).generate(
        300,
        config.simulation_years as usize,
        &[],
        &[],
        &CorrelationInputs::default(),
        0.0,
        0.0,
    );
    assert_eq!(shocks.mode(), ShockMode::Independent);
    let sim = DebtorSimulator::new(&config, &request.loans, &schedules, &shocks, 0);

    let mut defaults = 0;
    for i in 0..300 {
        let path = sim.simulate_path(i);
        let Some(k) = path.default_year else { continue };
        defaults += 1;
        let frozen = &path.years[k as usize - 1];
        for later in &path.years[k as usize..] {
            assert_eq!(
                YearResult {
                    year: frozen.year,
                    ..later.clone()
                },
                *frozen
            );
        }
    }
    assert!(defaults > 0);
}

// ===========================================================================
// Collaborators and error handling
// ===========================================================================

#[test]
fn test_observer_counts_paths_and_defaults() {
    let mut request = stressed_request();
    request.config.num_simulations = 400;
    let metrics = Arc::new(MetricsObserver::new());
    let out = SimulationOrchestrator::new()
        .with_observer(metrics.clone())
        .run(&request)
        .unwrap();
    let snap = metrics.snapshot();
    assert_eq!(snap.paths_completed, 400);
    assert_eq!(snap.defaults as usize, out.result.statistics.defaults);
    assert_eq!(snap.lgd_pct_histogram.iter().sum::<u64>(), snap.defaults);
    assert_eq!(snap.paths_excluded, 0);
}

#[test]
fn test_cancelled_run_returns_error() {
    let token = CancellationToken::new();
    token.cancel();
    let err = SimulationOrchestrator::new()
        .with_cancellation(token)
        .run(&stressed_request())
        .unwrap_err();
    assert!(matches!(err, CreditSimError::Cancelled { .. }));
}

#[test]
fn test_configuration_errors_rejected() {
    let mut request = stressed_request();
    request.config.simulation_years = 0;
    assert!(matches!(
        run_simulation(&request),
        Err(CreditSimError::InvalidInput { .. })
    ));

    let mut request = stressed_request();
    request.config.num_simulations = 0;
    assert!(run_simulation(&request).is_err());

    let mut request = stressed_request();
    request.loans[0].terms.as_mut().unwrap().tenor_months = 0;
    assert!(run_simulation(&request).is_err());
}

#[test]
fn test_annuity_out_of_decimal_range_is_rejected() {
    let mut request = stressed_request();
    request.loans[0].principal = 500_000.0;
    request.loans[0].terms = Some(LoanTerms {
        annual_rate: dec!(1.2),
        tenor_months: 1200,
        interest_only_months: 0,
        scheme: RedemptionScheme::Annuity,
    });
    match run_simulation(&request) {
        Err(CreditSimError::InvalidInput { field, .. }) => assert_eq!(field, "annual_rate"),
        other => panic!("expected InvalidInput, got {:?}", other.map(|o| o.result.excluded_paths)),
    }
}

#[test]
fn test_zero_collateral_and_zero_loan_do_not_fail() {
    let mut request = stressed_request();
    request.config.num_simulations = 200;
    request.loans[0].collateral_value = 0.0;
    request.loans.push(loan(2, 0.0, interest_only(dec!(0.05), 60)));
    let out = run_simulation(&request).unwrap();
    assert_eq!(out.result.excluded_paths, 0);
    if out.result.statistics.defaults > 0 {
        assert!((out.result.statistics.average_lgd_pct - 100.0).abs() < 1e-9);
    }
}

#[test]
fn test_sector_exposure_with_correlated_collateral() {
    let mut request = stressed_request();
    request.config.num_simulations = 300;
    request.config.sector_weights =
        BTreeMap::from([("retail".to_string(), 0.7), ("logistics".to_string(), 0.3)]);
    request.loans[0].property_type = Some("retail_property".into());
    request.correlation.sector_volatility =
        BTreeMap::from([("retail".to_string(), 0.3), ("logistics".to_string(), 0.2)]);
    request.correlation.sector_collateral_correlation.insert(
        "retail_property".into(),
        BTreeMap::from([("retail".to_string(), 0.8)]),
    );
    let out = run_simulation(&request).unwrap();
    assert_eq!(out.result.shock_mode, ShockMode::Correlated);
    assert!(out.warnings.iter().any(|w| w.contains("independently")));
}

#[test]
fn test_roi_uses_portfolio_loans_only() {
    let mut request = SimulationRequest {
        config: base_config(),
        loans: vec![loan(1, 500_000.0, interest_only(dec!(0.05), 240))],
        correlation: CorrelationInputs::default(),
        seed: Some(SEED),
    };
    request
        .loans
        .push(loan(-1, 1_000_000.0, interest_only(dec!(0.04), 240)));
    let out = run_simulation(&request).unwrap();
    let roi = &out.result.statistics.roi;
    assert_eq!(roi.nominal_amount, 500_000.0);
    // Ten years of 5% interest, no losses
    assert!((roi.roi - 0.5).abs() < 1e-9, "roi={}", roi.roi);
}

// ===========================================================================
// Non-finite paths
// ===========================================================================

/// Loan carrying a precomputed schedule with a fixed yearly interest charge.
fn precomputed(id: i64, interest_expense: f64, years: u32) -> LoanInput {
    LoanInput {
        schedule: (1..=years)
            .map(|year| LoanScheduleEntry {
                year,
                interest_expense,
                redemption_amount: 0.0,
                outstanding_balance: 1_000_000.0,
            })
            .collect(),
        terms: None,
        ..loan(id, 1_000_000.0, interest_only(dec!(0.05), 12))
    }
}

/// Revenue shocks large enough that two rising years overflow f64.
fn runaway_revenue_config() -> SimulationConfig {
    let mut config = base_config();
    config.revenue_volatility = 1e200;
    config.simulation_years = 5;
    config.num_simulations = 400;
    config
}

#[test]
fn test_all_paths_non_finite_is_insufficient_data() {
    let mut config = base_config();
    config.num_simulations = 50;
    // Interest of two loans at 1e308 sums to infinity
    let request = SimulationRequest {
        config,
        loans: vec![precomputed(1, 1e308, 10), precomputed(2, 1e308, 10)],
        correlation: CorrelationInputs::default(),
        seed: Some(SEED),
    };
    let metrics = Arc::new(MetricsObserver::new());
    let err = SimulationOrchestrator::new()
        .with_observer(metrics.clone())
        .run(&request)
        .unwrap_err();
    assert!(matches!(err, CreditSimError::InsufficientData(_)));

    let snap = metrics.snapshot();
    assert_eq!(snap.paths_excluded, 50);
    assert_eq!(snap.paths_completed, 0);
}

#[test]
fn test_non_finite_paths_excluded_and_reported() {
    let request = SimulationRequest {
        config: runaway_revenue_config(),
        loans: Vec::new(),
        correlation: CorrelationInputs::default(),
        seed: Some(SEED),
    };
    let metrics = Arc::new(MetricsObserver::new());
    let out = SimulationOrchestrator::new()
        .with_observer(metrics.clone())
        .run(&request)
        .unwrap();

    let excluded = out.result.excluded_paths;
    assert!(excluded > 0 && excluded < 400, "excluded={excluded}");
    assert_eq!(out.result.statistics.num_paths, 400 - excluded);
    assert!(out
        .warnings
        .iter()
        .any(|w| w.contains(&format!("{excluded} of 400 paths excluded"))));

    let snap = metrics.snapshot();
    assert_eq!(snap.paths_excluded as usize, excluded);
    assert_eq!(snap.paths_completed as usize, 400 - excluded);
}

#[test]
fn test_percentile_is_monotone() {
    let mut v: Vec<f64> = (0..97).map(|i| ((i * 37) % 101) as f64 - 50.0).collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let qs: Vec<f64> = (0..=100).map(|p| percentile(&v, p as f64)).collect();
    assert!(qs.windows(2).all(|w| w[0] <= w[1]));
}
