use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use credit_sim_core::amortization::schedule::{
    self, LoanScheduleInput, LoanTerms, RedemptionScheme,
};

use crate::input;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemeArg {
    Annuity,
    Linear,
    Bullet,
    BuildingDepot,
}

impl From<SchemeArg> for RedemptionScheme {
    fn from(s: SchemeArg) -> Self {
        match s {
            SchemeArg::Annuity => RedemptionScheme::Annuity,
            SchemeArg::Linear => RedemptionScheme::Linear,
            SchemeArg::Bullet => RedemptionScheme::Bullet,
            SchemeArg::BuildingDepot => RedemptionScheme::BuildingDepot,
        }
    }
}

/// Arguments for a yearly loan amortisation schedule
#[derive(Args)]
pub struct ScheduleArgs {
    /// Loan principal
    #[arg(long)]
    pub principal: Option<Decimal>,

    /// Annual interest rate (e.g. 0.05 for 5%)
    #[arg(long)]
    pub rate: Option<Decimal>,

    /// Tenor in months
    #[arg(long)]
    pub tenor_months: Option<u32>,

    /// Leading interest-only months
    #[arg(long, default_value_t = 0)]
    pub interest_only_months: u32,

    /// Redemption scheme
    #[arg(long, value_enum, default_value = "annuity")]
    pub scheme: SchemeArg,

    /// Simulation years to roll the schedule into (defaults to the tenor)
    #[arg(long)]
    pub years: Option<u32>,

    /// Path to JSON or YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_schedule(args: ScheduleArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let schedule_input: LoanScheduleInput = match (&args.input, args.principal) {
        (None, Some(principal)) => {
            let tenor_months = args
                .tenor_months
                .ok_or("--tenor-months is required with --principal")?;
            LoanScheduleInput {
                principal,
                terms: LoanTerms {
                    annual_rate: args.rate.unwrap_or(dec!(0.05)),
                    tenor_months,
                    interest_only_months: args.interest_only_months,
                    scheme: args.scheme.into(),
                },
                years: args.years.unwrap_or_else(|| tenor_months.div_ceil(12)),
            }
        }
        _ => input::read_request(args.input.as_deref(), "loan schedule")?,
    };
    let result = schedule::calculate_loan_schedule(&schedule_input)?;
    Ok(serde_json::to_value(result)?)
}
