use clap::Args;
use serde_json::Value;
use std::sync::Arc;

use credit_sim_core::simulation::config::SimulationRequest;
use credit_sim_core::simulation::observer::MetricsObserver;
use credit_sim_core::simulation::orchestrator::SimulationOrchestrator;

use crate::input;

/// Arguments for a single-debtor simulation
#[derive(Args)]
pub struct SimulateArgs {
    /// Path to JSON input file
    #[arg(long)]
    pub input: Option<String>,

    /// Override the request's seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the number of simulated paths
    #[arg(long)]
    pub simulations: Option<u32>,

    /// Override the simulation horizon in years
    #[arg(long)]
    pub years: Option<u32>,

    /// Run every path on the main thread
    #[arg(long)]
    pub sequential: bool,

    /// Drop the worst/median/best sample paths from the output
    #[arg(long)]
    pub no_samples: bool,

    /// Attach path and default counters to the output
    #[arg(long)]
    pub metrics: bool,
}

pub fn run_simulate(args: SimulateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request: SimulationRequest =
        input::read_request(args.input.as_deref(), "debtor simulation")?;
    if let Some(seed) = args.seed {
        request.seed = Some(seed);
    }
    if let Some(n) = args.simulations {
        request.config.num_simulations = n;
    }
    if let Some(years) = args.years {
        request.config.simulation_years = years;
    }

    let metrics = Arc::new(MetricsObserver::new());
    let mut orchestrator = SimulationOrchestrator::new().force_sequential(args.sequential);
    if args.metrics {
        orchestrator = orchestrator.with_observer(metrics.clone());
    }

    let mut result = orchestrator.run(&request)?;
    if args.no_samples {
        result.result.statistics.sample_paths = None;
    }

    let mut value = serde_json::to_value(result)?;
    if args.metrics {
        value["metrics"] = serde_json::to_value(metrics.snapshot())?;
    }
    Ok(value)
}
