use clap::Args;
use serde_json::Value;

use credit_sim_core::simulation::config::PortfolioRequest;
use credit_sim_core::simulation::orchestrator::SimulationOrchestrator;

use crate::input;

/// Arguments for a correlated portfolio simulation
#[derive(Args)]
pub struct PortfolioArgs {
    /// Path to JSON input file
    #[arg(long)]
    pub input: Option<String>,

    /// Override the request's seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the number of simulations
    #[arg(long)]
    pub simulations: Option<u32>,

    /// Override the simulation horizon in years
    #[arg(long)]
    pub years: Option<u32>,

    /// Run every simulation on the main thread
    #[arg(long)]
    pub sequential: bool,

    /// Keep the per-debtor sample paths in the output
    #[arg(long)]
    pub samples: bool,
}

pub fn run_portfolio(args: PortfolioArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request: PortfolioRequest =
        input::read_request(args.input.as_deref(), "portfolio simulation")?;
    if let Some(seed) = args.seed {
        request.seed = Some(seed);
    }
    if let Some(n) = args.simulations {
        request.num_simulations = n;
    }
    if let Some(years) = args.years {
        request.simulation_years = years;
    }

    let mut result = SimulationOrchestrator::new()
        .force_sequential(args.sequential)
        .run_portfolio(&request)?;

    // Sample paths per debtor dominate the payload for large portfolios
    if !args.samples {
        for debtor in &mut result.result.statistics.debtors {
            debtor.sample_paths = None;
        }
    }
    Ok(serde_json::to_value(result)?)
}
