use napi::Result as NapiResult;
use napi_derive::napi;

use credit_sim_core::amortization::schedule::{self, LoanScheduleInput};
use credit_sim_core::simulation::config::{PortfolioRequest, SimulationRequest};
use credit_sim_core::simulation::orchestrator;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[napi]
pub fn simulate_debtor(input_json: String) -> NapiResult<String> {
    let input: SimulationRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = orchestrator::run_simulation(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn simulate_portfolio(input_json: String) -> NapiResult<String> {
    let input: PortfolioRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = orchestrator::run_portfolio_simulation(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Amortisation
// ---------------------------------------------------------------------------

#[napi]
pub fn build_loan_schedule(input_json: String) -> NapiResult<String> {
    let input: LoanScheduleInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = schedule::calculate_loan_schedule(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
