use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::amortization::schedule::{build_loan_schedule, LoanScheduleEntry, LoanTerms};
use crate::error::CreditSimError;
use crate::CreditSimResult;

const WEIGHT_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Debtor configuration
// ---------------------------------------------------------------------------

/// Financial starting state and stochastic assumptions for one debtor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub debtor_id: String,
    pub initial_revenue: f64,
    pub initial_operating_costs: f64,
    #[serde(default)]
    pub initial_liquid_assets: f64,
    #[serde(default)]
    pub initial_total_assets: f64,
    /// Informational; simulated equity is always assets minus debt.
    #[serde(default)]
    pub initial_equity: f64,
    #[serde(default)]
    pub initial_debt: f64,
    #[serde(default)]
    pub revenue_growth: f64,
    #[serde(default)]
    pub revenue_volatility: f64,
    #[serde(default)]
    pub operating_cost_growth: f64,
    #[serde(default)]
    pub operating_cost_volatility: f64,
    #[serde(default)]
    pub tax_rate: f64,
    /// Sector → share of revenue. Must sum to 1.0 when present.
    #[serde(default)]
    pub sector_weights: BTreeMap<String, f64>,
    #[serde(default = "default_simulation_years")]
    pub simulation_years: u32,
    #[serde(default = "default_num_simulations")]
    pub num_simulations: u32,
    #[serde(default)]
    pub collateral_expected_return: f64,
    #[serde(default)]
    pub collateral_volatility: f64,
}

fn default_simulation_years() -> u32 {
    10
}

fn default_num_simulations() -> u32 {
    1_000
}

/// A loan extended to the debtor, with its collateral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanInput {
    /// Non-negative ids are portfolio loans; negative ids are externally
    /// held first liens (in exposure context, not in interest/ROI).
    pub loan_id: i64,
    pub principal: f64,
    #[serde(default)]
    pub collateral_value: f64,
    /// Liquidity haircut in percent (0-100)
    #[serde(default)]
    pub liquidity_haircut_pct: f64,
    /// Senior debt ranking ahead of this loan on the collateral
    #[serde(default)]
    pub subordination: f64,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub collateral_expected_return: Option<f64>,
    /// Precomputed schedule; takes precedence over `terms`
    #[serde(default)]
    pub schedule: Vec<LoanScheduleEntry>,
    #[serde(default)]
    pub terms: Option<LoanTerms>,
}

impl LoanInput {
    pub fn is_portfolio_loan(&self) -> bool {
        self.loan_id >= 0
    }
}

// ---------------------------------------------------------------------------
// Correlation inputs
// ---------------------------------------------------------------------------

/// Labelled square correlation matrix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Matrix with a single off-diagonal correlation for every pair.
    pub fn uniform(labels: Vec<String>, rho: f64) -> Self {
        let n = labels.len();
        let values = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { rho }).collect())
            .collect();
        Self { labels, values }
    }
}

/// Correlation structure and volatilities driving the shock generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationInputs {
    #[serde(default)]
    pub sector_correlation: Option<CorrelationMatrix>,
    #[serde(default)]
    pub sector_volatility: BTreeMap<String, f64>,
    /// Collateral type → (sector → correlation)
    #[serde(default)]
    pub sector_collateral_correlation: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub collateral_volatility: BTreeMap<String, f64>,
}

impl CorrelationInputs {
    pub fn has_sector_correlation(&self) -> bool {
        self.sector_correlation
            .as_ref()
            .is_some_and(|m| !m.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Single-debtor simulation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub config: SimulationConfig,
    #[serde(default)]
    pub loans: Vec<LoanInput>,
    #[serde(default)]
    pub correlation: CorrelationInputs,
    /// Optional seed for reproducibility.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// One debtor inside a portfolio request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtorInput {
    pub config: SimulationConfig,
    #[serde(default)]
    pub loans: Vec<LoanInput>,
}

/// Whole-portfolio simulation request; all debtors share one shock set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRequest {
    pub debtors: Vec<DebtorInput>,
    #[serde(default)]
    pub correlation: CorrelationInputs,
    /// Volatility for sectors missing from `correlation.sector_volatility`
    #[serde(default = "default_sector_volatility")]
    pub default_sector_volatility: f64,
    #[serde(default = "default_num_simulations")]
    pub num_simulations: u32,
    #[serde(default = "default_simulation_years")]
    pub simulation_years: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_sector_volatility() -> f64 {
    0.15
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> CreditSimError {
    CreditSimError::InvalidInput {
        field: field.into(),
        reason: reason.into(),
    }
}

fn require_non_negative(field: &str, value: f64) -> CreditSimResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, "Must be a finite, non-negative number"));
    }
    Ok(())
}

pub(crate) fn validate_run_shape(num_simulations: u32, years: u32) -> CreditSimResult<()> {
    if num_simulations == 0 {
        return Err(invalid("num_simulations", "Must be at least 1"));
    }
    if years == 0 {
        return Err(invalid("simulation_years", "Must be at least 1"));
    }
    Ok(())
}

/// Reject configuration errors before any path is simulated.
pub fn validate_config(config: &SimulationConfig) -> CreditSimResult<()> {
    validate_run_shape(config.num_simulations, config.simulation_years)?;
    for (field, value) in [
        ("initial_revenue", config.initial_revenue),
        ("initial_operating_costs", config.initial_operating_costs),
        ("revenue_volatility", config.revenue_volatility),
        ("operating_cost_volatility", config.operating_cost_volatility),
        ("collateral_volatility", config.collateral_volatility),
        ("initial_debt", config.initial_debt),
    ] {
        require_non_negative(field, value)?;
    }
    for (field, value) in [
        ("initial_liquid_assets", config.initial_liquid_assets),
        ("initial_total_assets", config.initial_total_assets),
        ("revenue_growth", config.revenue_growth),
        ("operating_cost_growth", config.operating_cost_growth),
        ("collateral_expected_return", config.collateral_expected_return),
    ] {
        if !value.is_finite() {
            return Err(invalid(field, "Must be finite"));
        }
    }
    if !(0.0..=1.0).contains(&config.tax_rate) {
        return Err(invalid("tax_rate", "Must be between 0 and 1"));
    }
    if !config.sector_weights.is_empty() {
        if let Some((sector, _)) = config
            .sector_weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(invalid(
                format!("sector_weights.{sector}"),
                "Weights must be non-negative",
            ));
        }
        let total: f64 = config.sector_weights.values().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(invalid(
                "sector_weights",
                format!("Weights must sum to 1.0, got {total:.6}"),
            ));
        }
    }
    Ok(())
}

pub fn validate_loans(loans: &[LoanInput]) -> CreditSimResult<()> {
    for loan in loans {
        let prefix = format!("loans[{}]", loan.loan_id);
        require_non_negative(&format!("{prefix}.principal"), loan.principal)?;
        require_non_negative(&format!("{prefix}.collateral_value"), loan.collateral_value)?;
        require_non_negative(&format!("{prefix}.subordination"), loan.subordination)?;
        if !(0.0..=100.0).contains(&loan.liquidity_haircut_pct) {
            return Err(invalid(
                format!("{prefix}.liquidity_haircut_pct"),
                "Must be between 0 and 100",
            ));
        }
        if let Some(terms) = &loan.terms {
            if terms.tenor_months == 0 {
                return Err(invalid(
                    format!("{prefix}.terms.tenor_months"),
                    "Tenor must be at least 1 month",
                ));
            }
        }
    }
    Ok(())
}

pub fn validate_correlation(inputs: &CorrelationInputs) -> CreditSimResult<()> {
    for (name, vol) in inputs
        .sector_volatility
        .iter()
        .chain(inputs.collateral_volatility.iter())
    {
        require_non_negative(&format!("volatility.{name}"), *vol)?;
    }
    if let Some(matrix) = &inputs.sector_correlation {
        let n = matrix.labels.len();
        if matrix.values.len() != n || matrix.values.iter().any(|row| row.len() != n) {
            return Err(CreditSimError::InvalidCorrelation(format!(
                "matrix must be {n}x{n} to match its labels"
            )));
        }
        if matrix.values.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CreditSimError::InvalidCorrelation(
                "matrix contains non-finite entries".into(),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Factor universe
// ---------------------------------------------------------------------------

/// Sorted, de-duplicated sectors and collateral types across debtors.
pub(crate) fn factor_universe<'a>(
    debtors: impl IntoIterator<Item = (&'a SimulationConfig, &'a [LoanInput])>,
) -> (Vec<String>, Vec<String>) {
    let mut sectors = BTreeSet::new();
    let mut collateral_types = BTreeSet::new();
    for (config, loans) in debtors {
        sectors.extend(config.sector_weights.keys().cloned());
        collateral_types.extend(loans.iter().filter_map(|l| l.property_type.clone()));
    }
    (
        sectors.into_iter().collect(),
        collateral_types.into_iter().collect(),
    )
}

// ---------------------------------------------------------------------------
// Schedule provider
// ---------------------------------------------------------------------------

/// Source of per-year loan schedules (the amortisation collaborator).
pub trait ScheduleProvider: Send + Sync {
    /// Exactly `years` rows, year 1..=years.
    fn schedule(&self, loan: &LoanInput, years: u32) -> CreditSimResult<Vec<LoanScheduleEntry>>;
}

/// Uses a loan's precomputed schedule, else builds one from its terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmortizationScheduleProvider;

impl ScheduleProvider for AmortizationScheduleProvider {
    fn schedule(&self, loan: &LoanInput, years: u32) -> CreditSimResult<Vec<LoanScheduleEntry>> {
        if !loan.schedule.is_empty() {
            return Ok((1..=years)
                .map(|year| {
                    loan.schedule
                        .iter()
                        .find(|e| e.year == year)
                        .copied()
                        .unwrap_or_else(|| LoanScheduleEntry::empty(year))
                })
                .collect());
        }
        match &loan.terms {
            Some(terms) => {
                let principal = Decimal::from_f64_retain(loan.principal).ok_or_else(|| {
                    invalid(format!("loans[{}].principal", loan.loan_id), "Not representable")
                })?;
                build_loan_schedule(principal, terms, years)
            }
            None => Ok((1..=years).map(LoanScheduleEntry::empty).collect()),
        }
    }
}
