mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::portfolio::PortfolioArgs;
use commands::schedule::ScheduleArgs;
use commands::simulate::SimulateArgs;

/// Stochastic credit-risk simulation
#[derive(Parser)]
#[command(
    name = "csim",
    version,
    about = "Stochastic credit-risk simulation",
    long_about = "A CLI for Monte Carlo credit-risk simulation of borrowers and loan \
                  portfolios. Projects debtor financials under correlated sector and \
                  collateral shocks and reports default probabilities, loss given \
                  default, expected loss and lender returns."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log simulation progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a single debtor and its loans
    Simulate(SimulateArgs),
    /// Simulate a portfolio of debtors on shared shocks
    Portfolio(PortfolioArgs),
    /// Build a yearly loan amortisation schedule
    Schedule(ScheduleArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_logging(verbose: bool) {
    // stdout carries the result; logs go to stderr
    let default = if verbose { "credit_sim_core=debug,info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Simulate(args) => commands::simulate::run_simulate(args),
        Commands::Portfolio(args) => commands::portfolio::run_portfolio(args),
        Commands::Schedule(args) => commands::schedule::run_schedule(args),
        Commands::Version => {
            println!("csim {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
