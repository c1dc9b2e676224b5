use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::CreditSimError;
use crate::types::*;
use crate::CreditSimResult;

const MONTHS_PER_YEAR: u32 = 12;

/// Redemption scheme of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedemptionScheme {
    /// Level instalment (interest + redemption) per month
    Annuity,
    /// Equal principal slices per month
    Linear,
    /// Everything repaid in the final month
    Bullet,
    /// Building-depot financing; amortises like an annuity
    BuildingDepot,
}

/// Contractual terms needed to build a repayment schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanTerms {
    pub annual_rate: Rate,
    pub tenor_months: u32,
    #[serde(default)]
    pub interest_only_months: u32,
    pub scheme: RedemptionScheme,
}

/// One simulation year of a loan's precomputed schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanScheduleEntry {
    pub year: u32,
    pub interest_expense: f64,
    pub redemption_amount: f64,
    /// Balance after this year's redemption
    pub outstanding_balance: f64,
}

impl LoanScheduleEntry {
    pub fn empty(year: u32) -> Self {
        Self {
            year,
            interest_expense: 0.0,
            redemption_amount: 0.0,
            outstanding_balance: 0.0,
        }
    }

    /// Balance at the start of the year.
    pub fn opening_balance(&self) -> f64 {
        self.outstanding_balance + self.redemption_amount
    }
}

/// Input for a standalone schedule computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanScheduleInput {
    pub principal: Money,
    pub terms: LoanTerms,
    /// Number of simulation years to roll the schedule up into
    pub years: u32,
}

/// A single year of the Decimal schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePeriod {
    pub year: u32,
    pub opening_balance: Money,
    pub interest: Money,
    pub redemption: Money,
    pub closing_balance: Money,
}

/// Output for a single loan schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanScheduleOutput {
    pub periods: Vec<SchedulePeriod>,
    pub total_interest: Money,
    pub total_redemption: Money,
    pub monthly_instalment: Option<Money>,
}

/// Build a year-by-year schedule for one loan, wrapped in the standard envelope.
pub fn calculate_loan_schedule(
    input: &LoanScheduleInput,
) -> CreditSimResult<ComputationOutput<LoanScheduleOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if input.years == 0 {
        return Err(CreditSimError::InvalidInput {
            field: "years".into(),
            reason: "Must be at least 1".into(),
        });
    }
    validate_terms(input.principal, &input.terms)?;
    if input.terms.interest_only_months > input.terms.tenor_months {
        warnings.push(format!(
            "interest_only_months ({}) exceeds tenor; clamped to {}",
            input.terms.interest_only_months, input.terms.tenor_months
        ));
    }

    let periods = build_periods(input.principal, &input.terms, input.years)?;
    let total_interest = periods.iter().map(|p| p.interest).sum();
    let total_redemption = periods.iter().map(|p| p.redemption).sum();
    let monthly_instalment = match input.terms.scheme {
        RedemptionScheme::Annuity | RedemptionScheme::BuildingDepot => {
            Some(annuity_instalment(input.principal, &input.terms)?.round_dp(2))
        }
        _ => None,
    };

    let output = LoanScheduleOutput {
        periods,
        total_interest,
        total_redemption,
        monthly_instalment,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Monthly amortisation rolled up to simulation years",
        PRECISION_DECIMAL,
        input,
        warnings,
        elapsed,
        output,
    ))
}

/// Build the per-year `LoanScheduleEntry` rows consumed by the simulator.
pub fn build_loan_schedule(
    principal: Money,
    terms: &LoanTerms,
    years: u32,
) -> CreditSimResult<Vec<LoanScheduleEntry>> {
    validate_terms(principal, terms)?;
    Ok(build_periods(principal, terms, years)?
        .into_iter()
        .map(|p| LoanScheduleEntry {
            year: p.year,
            interest_expense: p.interest.to_f64().unwrap_or(0.0),
            redemption_amount: p.redemption.to_f64().unwrap_or(0.0),
            outstanding_balance: p.closing_balance.to_f64().unwrap_or(0.0),
        })
        .collect())
}

fn validate_terms(principal: Money, terms: &LoanTerms) -> CreditSimResult<()> {
    if principal < Decimal::ZERO {
        return Err(CreditSimError::InvalidInput {
            field: "principal".into(),
            reason: "Loan principal cannot be negative".into(),
        });
    }
    if terms.tenor_months == 0 {
        return Err(CreditSimError::InvalidInput {
            field: "tenor_months".into(),
            reason: "Tenor must be at least 1 month".into(),
        });
    }
    if terms.annual_rate <= dec!(-1) {
        return Err(CreditSimError::InvalidInput {
            field: "annual_rate".into(),
            reason: "Rate must be greater than -100%".into(),
        });
    }
    Ok(())
}

fn out_of_range(terms: &LoanTerms) -> CreditSimError {
    CreditSimError::InvalidInput {
        field: "annual_rate".into(),
        reason: format!(
            "Schedule at {} over {} months exceeds the Decimal range",
            terms.annual_rate, terms.tenor_months
        ),
    }
}

/// Level monthly instalment over the amortising part of the tenor.
fn annuity_instalment(balance: Money, terms: &LoanTerms) -> CreditSimResult<Money> {
    let io_months = terms.interest_only_months.min(terms.tenor_months);
    let n = terms.tenor_months - io_months;
    if n == 0 || balance.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let r = terms.annual_rate / Decimal::from(MONTHS_PER_YEAR);
    if r.is_zero() {
        return Ok(balance / Decimal::from(n));
    }
    // (1 + r)^n overflows for high rates over long tenors and underflows to
    // zero for deeply negative ones
    let growth = (Decimal::ONE + r)
        .checked_powi(n as i64)
        .ok_or_else(|| out_of_range(terms))?;
    let discount = Decimal::ONE
        .checked_div(growth)
        .ok_or_else(|| out_of_range(terms))?;
    balance
        .checked_mul(r)
        .and_then(|x| x.checked_div(Decimal::ONE - discount))
        .ok_or_else(|| out_of_range(terms))
}

fn build_periods(
    principal: Money,
    terms: &LoanTerms,
    years: u32,
) -> CreditSimResult<Vec<SchedulePeriod>> {
    let monthly_rate = terms.annual_rate / Decimal::from(MONTHS_PER_YEAR);
    let io_months = terms.interest_only_months.min(terms.tenor_months);
    let amortising_months = terms.tenor_months - io_months;
    let instalment = annuity_instalment(principal, terms)?;
    let linear_slice = if amortising_months > 0 {
        principal / Decimal::from(amortising_months)
    } else {
        Decimal::ZERO
    };

    let mut balance = principal;
    let mut periods = Vec::with_capacity(years as usize);

    for year in 1..=years {
        let opening = balance;
        let mut interest = Decimal::ZERO;
        let mut redemption = Decimal::ZERO;

        for m in 1..=MONTHS_PER_YEAR {
            let month = (year - 1) * MONTHS_PER_YEAR + m;
            if month > terms.tenor_months || balance.is_zero() {
                break;
            }
            let month_interest = balance
                .checked_mul(monthly_rate)
                .ok_or_else(|| out_of_range(terms))?;
            interest = interest
                .checked_add(month_interest)
                .ok_or_else(|| out_of_range(terms))?;

            let scheduled = if month == terms.tenor_months {
                // Final month settles whatever is left
                balance
            } else if month <= io_months {
                Decimal::ZERO
            } else {
                match terms.scheme {
                    RedemptionScheme::Annuity | RedemptionScheme::BuildingDepot => {
                        (instalment - month_interest).max(Decimal::ZERO)
                    }
                    RedemptionScheme::Linear => linear_slice,
                    RedemptionScheme::Bullet => Decimal::ZERO,
                }
            };
            let paid = scheduled.min(balance);
            redemption += paid;
            balance -= paid;
        }

        periods.push(SchedulePeriod {
            year,
            opening_balance: opening,
            interest,
            redemption,
            closing_balance: balance,
        });
    }

    Ok(periods)
}
