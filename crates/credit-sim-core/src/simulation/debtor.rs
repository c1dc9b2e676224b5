use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::amortization::schedule::LoanScheduleEntry;
use crate::simulation::config::{LoanInput, SimulationConfig};
use crate::simulation::random::{box_muller, path_rng};
use crate::simulation::recovery::{recover, RecoveryOutcome};
use crate::simulation::shocks::ShockSet;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One year of one simulated path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearResult {
    pub year: u32,
    pub revenue: f64,
    pub operating_costs: f64,
    pub ebitda: f64,
    pub interest_expense: f64,
    pub tax: f64,
    pub net_income: f64,
    pub redemption: f64,
    pub debt: f64,
    pub total_assets: f64,
    pub equity: f64,
    pub liquid_assets: f64,
    pub liquid_assets_change: f64,
    pub collateral_value: f64,
    /// EBITDA / interest; `None` when no interest is due
    pub interest_coverage: Option<f64>,
    pub can_pay_interest: bool,
}

impl YearResult {
    fn is_finite(&self) -> bool {
        [
            self.revenue,
            self.operating_costs,
            self.ebitda,
            self.interest_expense,
            self.tax,
            self.net_income,
            self.redemption,
            self.debt,
            self.total_assets,
            self.equity,
            self.liquid_assets,
            self.liquid_assets_change,
            self.collateral_value,
        ]
        .iter()
        .chain(self.interest_coverage.iter())
        .all(|v| v.is_finite())
    }
}

/// A full multi-year trajectory for one (debtor, simulation) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationPath {
    /// 1-based simulation number
    pub path_number: usize,
    pub years: Vec<YearResult>,
    pub default_occurred: bool,
    pub default_year: Option<u32>,
    pub exposure_at_default: f64,
    pub collateral_value_at_default: f64,
    pub recovered_amount: f64,
    pub loss_given_default: f64,
    pub loss_given_default_pct: f64,
    /// Interest actually received on portfolio loans (id >= 0)
    pub total_interest_earned: f64,
}

impl SimulationPath {
    pub fn terminal(&self) -> Option<&YearResult> {
        self.years.last()
    }

    pub fn terminal_equity(&self) -> f64 {
        self.terminal().map(|y| y.equity).unwrap_or(0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.years.iter().all(YearResult::is_finite)
            && [
                self.exposure_at_default,
                self.collateral_value_at_default,
                self.recovered_amount,
                self.loss_given_default,
                self.loss_given_default_pct,
                self.total_interest_earned,
            ]
            .iter()
            .all(|v| v.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Per-run view of one debtor: its loans, resolved schedules and factor
/// indices into the shared shock set. Holds no per-path state, so one
/// instance can serve every path concurrently.
pub struct DebtorSimulator<'a> {
    config: &'a SimulationConfig,
    loans: &'a [LoanInput],
    schedules: &'a [Vec<LoanScheduleEntry>],
    shocks: &'a ShockSet,
    debtor_index: usize,
    /// (sector index, weight)
    sector_weights: Vec<(usize, f64)>,
    /// Collateral factor index per loan
    collateral_factor: Vec<Option<usize>>,
    collateral_drift: Vec<f64>,
}

impl<'a> DebtorSimulator<'a> {
    pub fn new(
        config: &'a SimulationConfig,
        loans: &'a [LoanInput],
        schedules: &'a [Vec<LoanScheduleEntry>],
        shocks: &'a ShockSet,
        debtor_index: usize,
    ) -> Self {
        let sector_weights = config
            .sector_weights
            .iter()
            .filter_map(|(s, w)| shocks.sector_index(s).map(|i| (i, *w)))
            .collect();
        let collateral_factor = loans
            .iter()
            .map(|l| {
                l.property_type
                    .as_deref()
                    .and_then(|t| shocks.collateral_index(t))
            })
            .collect();
        let collateral_drift = loans
            .iter()
            .map(|l| {
                l.collateral_expected_return
                    .unwrap_or(config.collateral_expected_return)
            })
            .collect();
        Self {
            config,
            loans,
            schedules,
            shocks,
            debtor_index,
            sector_weights,
            collateral_factor,
            collateral_drift,
        }
    }

    pub fn debtor_id(&self) -> &str {
        &self.config.debtor_id
    }

    /// Simulate one path (0-based `path_index`) over the configured years.
    ///
    /// Once a default is detected the remaining years repeat the default
    /// year's figures; no further shocks are applied.
    pub fn simulate_path(&self, path_index: usize) -> SimulationPath {
        let num_years = (self.config.simulation_years as usize).min(self.shocks.num_years());
        let mut rng = path_rng(self.shocks.seed(), self.debtor_index, path_index);
        let mut state = DebtorState::initial(self.config);
        let mut collateral: Vec<f64> = self
            .loans
            .iter()
            .map(|l| l.collateral_value.max(0.0))
            .collect();

        let mut years = Vec::with_capacity(num_years);
        let mut default: Option<(u32, RecoveryOutcome)> = None;
        let mut total_interest_earned = 0.0;

        for year in 0..num_years {
            let year_number = year as u32 + 1;
            if default.is_some() {
                if let Some(last) = years.last().cloned() {
                    years.push(YearResult {
                        year: year_number,
                        ..last
                    });
                }
                continue;
            }

            let (result, interest_earned) =
                self.advance_year(&mut state, &mut collateral, &mut rng, path_index, year);
            total_interest_earned += interest_earned;

            let defaulted =
                result.ebitda < self.payments_due(year) && result.liquid_assets <= 0.0;
            years.push(result);

            if defaulted {
                default = Some((year_number, recover(self.loans, &collateral, self.schedules, year)));
            }
        }

        let outcome = default.map(|(_, o)| o).unwrap_or_default();
        SimulationPath {
            path_number: path_index + 1,
            years,
            default_occurred: default.is_some(),
            default_year: default.map(|(y, _)| y),
            exposure_at_default: outcome.exposure_at_default,
            collateral_value_at_default: outcome.collateral_value,
            recovered_amount: outcome.recovered,
            loss_given_default: outcome.loss,
            loss_given_default_pct: outcome.loss_pct,
            total_interest_earned,
        }
    }

    fn payments_due(&self, year: usize) -> f64 {
        self.schedules
            .iter()
            .filter_map(|s| s.get(year))
            .map(|e| e.interest_expense + e.redemption_amount)
            .sum()
    }

    fn revenue_shock(&self, rng: &mut StdRng, path: usize, year: usize) -> f64 {
        // Draw unconditionally so the idiosyncratic stream stays aligned
        let idiosyncratic = box_muller(rng);
        if self.sector_weights.is_empty() {
            return self.config.revenue_volatility * idiosyncratic;
        }
        let sector_shocks = self.shocks.sector_shocks(path, year);
        self.sector_weights
            .iter()
            .map(|(i, w)| w * sector_shocks[*i])
            .sum()
    }

    fn advance_year(
        &self,
        state: &mut DebtorState,
        collateral: &mut [f64],
        rng: &mut StdRng,
        path: usize,
        year: usize,
    ) -> (YearResult, f64) {
        let cfg = self.config;

        // 1-2. revenue and operating costs
        let revenue_shock = self.revenue_shock(rng, path, year);
        let cost_shock = cfg.operating_cost_volatility * box_muller(rng);
        state.revenue = (state.revenue * (1.0 + cfg.revenue_growth + revenue_shock)).max(0.0);
        state.operating_costs =
            (state.operating_costs * (1.0 + cfg.operating_cost_growth + cost_shock)).max(0.0);

        // 3. collateral
        let collateral_shocks = self.shocks.collateral_shocks(path, year);
        for ((value, factor), drift) in collateral
            .iter_mut()
            .zip(&self.collateral_factor)
            .zip(&self.collateral_drift)
        {
            let shock = factor.map(|i| collateral_shocks[i]).unwrap_or(0.0);
            *value = (*value * (1.0 + drift + shock)).max(0.0);
        }

        // 4. debt service due
        let mut interest = 0.0;
        let mut portfolio_interest = 0.0;
        let mut redemption = 0.0;
        for (loan, schedule) in self.loans.iter().zip(self.schedules) {
            if let Some(entry) = schedule.get(year) {
                interest += entry.interest_expense;
                redemption += entry.redemption_amount;
                if loan.is_portfolio_loan() {
                    portfolio_interest += entry.interest_expense;
                }
            }
        }
        let payments = interest + redemption;

        // 5. earnings
        let ebitda = state.revenue - state.operating_costs;
        let tax = (ebitda - interest).max(0.0) * cfg.tax_rate;
        let net_income = ebitda - interest - tax;

        // 6. liquidity; interest ranks ahead of redemption
        let cash_on_hand = state.liquid_assets.max(0.0) + ebitda - tax;
        let can_pay_interest = cash_on_hand >= interest;
        let (liquid_change, redemption_paid, interest_paid) = if ebitda >= payments {
            (ebitda - payments - tax, redemption, interest)
        } else {
            let shortfall = payments + tax - ebitda;
            if cash_on_hand >= payments {
                (-shortfall, redemption, interest)
            } else if can_pay_interest {
                (-shortfall, (cash_on_hand - interest).max(0.0), interest)
            } else {
                (-shortfall, 0.0, cash_on_hand.max(0.0))
            }
        };
        let interest_earned = if interest > 0.0 {
            interest_paid * portfolio_interest / interest
        } else {
            0.0
        };

        // 7. balance sheet; equity is derived, never accumulated
        state.liquid_assets += liquid_change;
        state.total_assets += liquid_change;
        state.debt = (state.debt - redemption_paid).max(0.0);
        let equity = state.total_assets - state.debt;

        let result = YearResult {
            year: year as u32 + 1,
            revenue: state.revenue,
            operating_costs: state.operating_costs,
            ebitda,
            interest_expense: interest,
            tax,
            net_income,
            redemption: redemption_paid,
            debt: state.debt,
            total_assets: state.total_assets,
            equity,
            liquid_assets: state.liquid_assets,
            liquid_assets_change: liquid_change,
            collateral_value: collateral.iter().sum(),
            interest_coverage: (interest > 0.0).then(|| ebitda / interest),
            can_pay_interest,
        };
        (result, interest_earned)
    }
}

/// Mutable per-path financial state.
struct DebtorState {
    revenue: f64,
    operating_costs: f64,
    liquid_assets: f64,
    total_assets: f64,
    debt: f64,
}

impl DebtorState {
    fn initial(config: &SimulationConfig) -> Self {
        Self {
            revenue: config.initial_revenue.max(0.0),
            operating_costs: config.initial_operating_costs.max(0.0),
            liquid_assets: config.initial_liquid_assets,
            total_assets: config.initial_total_assets,
            debt: config.initial_debt.max(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
