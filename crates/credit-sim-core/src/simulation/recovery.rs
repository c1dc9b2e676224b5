use serde::{Deserialize, Serialize};

use crate::amortization::schedule::LoanScheduleEntry;
use crate::simulation::config::LoanInput;

/// Outcome of the collateral recovery waterfall at default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// Portfolio-loan balance outstanding at the start of the default year
    pub exposure_at_default: f64,
    /// Market value of all collateral at default
    pub collateral_value: f64,
    pub collateral_after_haircut: f64,
    pub subordination: f64,
    pub recovery_pool: f64,
    pub recovered: f64,
    pub loss: f64,
    pub loss_pct: f64,
}

/// Run the recovery waterfall for a debtor defaulting in `default_year`.
///
/// `collateral_values` is aligned with `loans`; `schedules` holds one row per
/// simulation year per loan. Subordination is a claim on the shared
/// collateral pool, so it is deducted once (the largest senior claim on any
/// loan), not per loan.
pub fn recover(
    loans: &[LoanInput],
    collateral_values: &[f64],
    schedules: &[Vec<LoanScheduleEntry>],
    default_year: usize,
) -> RecoveryOutcome {
    let mut collateral_value = 0.0;
    let mut collateral_after_haircut = 0.0;
    let mut subordination: f64 = 0.0;
    let mut exposure_at_default = 0.0;

    for ((loan, value), schedule) in loans.iter().zip(collateral_values).zip(schedules) {
        let value = value.max(0.0);
        let haircut = (loan.liquidity_haircut_pct / 100.0).clamp(0.0, 1.0);
        collateral_value += value;
        collateral_after_haircut += value * (1.0 - haircut);
        subordination = subordination.max(loan.subordination.max(0.0));

        if loan.is_portfolio_loan() {
            exposure_at_default += schedule
                .get(default_year)
                .map(|e| e.opening_balance())
                .unwrap_or(0.0)
                .max(0.0);
        }
    }

    let recovery_pool = (collateral_after_haircut - subordination).max(0.0);
    let recovered = recovery_pool.min(exposure_at_default);
    let loss = (exposure_at_default - recovered).max(0.0);
    let loss_pct = if exposure_at_default > 0.0 {
        loss / exposure_at_default * 100.0
    } else {
        0.0
    };

    RecoveryOutcome {
        exposure_at_default,
        collateral_value,
        collateral_after_haircut,
        subordination,
        recovery_pool,
        recovered,
        loss,
        loss_pct,
    }
}
