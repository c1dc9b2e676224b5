#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::amortization::schedule::LoanScheduleEntry;
use crate::error::CreditSimError;
use crate::simulation::cancellation::CancellationToken;
use crate::simulation::config::{
    factor_universe, validate_config, validate_correlation, validate_loans, validate_run_shape,
    AmortizationScheduleProvider, LoanInput, PortfolioRequest, ScheduleProvider,
    SimulationConfig, SimulationRequest,
};
use crate::simulation::debtor::{DebtorSimulator, SimulationPath};
use crate::simulation::observer::{SimulationObserver, TracingObserver};
use crate::simulation::shocks::{ShockGenerator, ShockMode, ShockSet};
use crate::statistics::aggregator::{aggregate_debtor, DebtorStatistics};
use crate::statistics::portfolio::{
    aggregate_portfolio, unassigned_key, DebtorExposure, PortfolioStatistics, SimulationOutcome,
};
use crate::types::{with_metadata, ComputationOutput, PRECISION_F64};
use crate::CreditSimResult;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Result of a single-debtor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub statistics: DebtorStatistics,
    pub shock_mode: ShockMode,
    pub excluded_paths: usize,
}

/// Result of a portfolio run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioOutput {
    pub statistics: PortfolioStatistics,
    pub shock_mode: ShockMode,
    pub excluded_paths: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives shock generation, path simulation and aggregation.
#[derive(Clone)]
pub struct SimulationOrchestrator {
    observer: Arc<dyn SimulationObserver>,
    cancellation: CancellationToken,
    schedules: Arc<dyn ScheduleProvider>,
    force_sequential: bool,
}

impl Default for SimulationOrchestrator {
    fn default() -> Self {
        Self {
            observer: Arc::new(TracingObserver),
            cancellation: CancellationToken::new(),
            schedules: Arc::new(AmortizationScheduleProvider),
            force_sequential: false,
        }
    }
}

/// A debtor with its schedules resolved for the run horizon.
struct PreparedDebtor<'a> {
    config: &'a SimulationConfig,
    loans: &'a [LoanInput],
    schedules: Vec<Vec<LoanScheduleEntry>>,
    nominal: f64,
}

impl SimulationOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn SimulationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_schedule_provider(mut self, provider: Arc<dyn ScheduleProvider>) -> Self {
        self.schedules = provider;
        self
    }

    /// Run paths on the calling thread even when `parallel` is enabled.
    pub fn force_sequential(mut self, sequential: bool) -> Self {
        self.force_sequential = sequential;
        self
    }

    fn prepare<'a>(
        &self,
        config: &'a SimulationConfig,
        loans: &'a [LoanInput],
        years: u32,
    ) -> CreditSimResult<PreparedDebtor<'a>> {
        let schedules = loans
            .iter()
            .map(|loan| self.schedules.schedule(loan, years))
            .collect::<CreditSimResult<Vec<_>>>()?;
        let nominal = loans
            .iter()
            .filter(|l| l.is_portfolio_loan())
            .map(|l| l.principal)
            .sum();
        Ok(PreparedDebtor {
            config,
            loans,
            schedules,
            nominal,
        })
    }

    /// Apply `f` to every index, on rayon when enabled, preserving order.
    fn map_indices<R, F>(&self, n: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            if !self.force_sequential {
                return (0..n).into_par_iter().map(f).collect();
            }
        }
        #[cfg(not(feature = "parallel"))]
        let _ = self.force_sequential;
        (0..n).map(f).collect()
    }

    fn check_cancelled(&self, completed: &AtomicUsize) -> CreditSimResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(CreditSimError::Cancelled {
                completed_paths: completed.load(Ordering::Relaxed),
            });
        }
        Ok(())
    }

    /// Simulate one path and vet it; non-finite paths are reported and dropped.
    fn vetted_path(&self, sim: &DebtorSimulator<'_>, path_index: usize) -> Option<SimulationPath> {
        let path = sim.simulate_path(path_index);
        if !path.is_finite() {
            self.observer
                .on_path_excluded(sim.debtor_id(), path.path_number, "non-finite values");
            return None;
        }
        self.observer.on_path_completed(sim.debtor_id(), &path);
        if path.default_occurred {
            self.observer.on_default(sim.debtor_id(), &path);
        }
        Some(path)
    }

    // -----------------------------------------------------------------------
    // Single-debtor mode
    // -----------------------------------------------------------------------

    pub fn run(
        &self,
        request: &SimulationRequest,
    ) -> CreditSimResult<ComputationOutput<SimulationOutput>> {
        let start = Instant::now();
        let config = &request.config;
        validate_config(config)?;
        validate_loans(&request.loans)?;
        validate_correlation(&request.correlation)?;

        let years = config.simulation_years;
        let num_paths = config.num_simulations as usize;
        let seed = request.seed.unwrap_or_else(rand::random);
        let debtor = self.prepare(config, &request.loans, years)?;

        let (sectors, collateral_types) =
            factor_universe([(config, request.loans.as_slice())]);
        info!(
            debtor_id = %config.debtor_id,
            seed,
            paths = num_paths,
            years,
            sectors = sectors.len(),
            sector_matrix = request.correlation.has_sector_correlation(),
            "starting debtor simulation"
        );

        let shocks = ShockGenerator::new(seed).generate(
            num_paths,
            years as usize,
            &sectors,
            &collateral_types,
            &request.correlation,
            config.revenue_volatility,
            config.collateral_volatility,
        );
        let mut warnings = shocks.warnings().to_vec();

        let sim = DebtorSimulator::new(config, debtor.loans, &debtor.schedules, &shocks, 0);
        let completed = AtomicUsize::new(0);
        let results = self.map_indices(num_paths, |i| -> CreditSimResult<Option<SimulationPath>> {
            self.check_cancelled(&completed)?;
            let path = self.vetted_path(&sim, i);
            completed.fetch_add(1, Ordering::Relaxed);
            Ok(path)
        });
        let results = results.into_iter().collect::<CreditSimResult<Vec<_>>>()?;

        let paths: Vec<SimulationPath> = results.into_iter().flatten().collect();
        let excluded = num_paths - paths.len();
        if paths.is_empty() {
            return Err(CreditSimError::InsufficientData(
                "Every simulated path produced non-finite values".into(),
            ));
        }
        if excluded > 0 {
            warn!(excluded, "paths excluded from statistics");
            warnings.push(format!(
                "{excluded} of {num_paths} paths excluded (non-finite values)"
            ));
        }

        let statistics = aggregate_debtor(&config.debtor_id, &paths, debtor.nominal, years);
        info!(
            debtor_id = %config.debtor_id,
            pd = statistics.probability_of_default,
            expected_loss = statistics.expected_loss,
            "debtor simulation complete"
        );

        let output = SimulationOutput {
            statistics,
            shock_mode: shocks.mode(),
            excluded_paths: excluded,
        };

        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Correlated Monte Carlo debtor simulation (Cholesky sector shocks, collateral recovery waterfall)",
            PRECISION_F64,
            &serde_json::json!({
                "debtor_id": config.debtor_id,
                "num_simulations": num_paths,
                "simulation_years": years,
                "seed": seed,
                "sectors": sectors,
                "collateral_types": collateral_types,
                "loans": request.loans.len(),
            }),
            warnings,
            elapsed,
            output,
        ))
    }

    // -----------------------------------------------------------------------
    // Portfolio mode
    // -----------------------------------------------------------------------

    pub fn run_portfolio(
        &self,
        request: &PortfolioRequest,
    ) -> CreditSimResult<ComputationOutput<PortfolioOutput>> {
        let start = Instant::now();
        if request.debtors.is_empty() {
            return Err(CreditSimError::InsufficientData(
                "At least one debtor is required".into(),
            ));
        }
        validate_run_shape(request.num_simulations, request.simulation_years)?;
        validate_correlation(&request.correlation)?;
        if !request.default_sector_volatility.is_finite() || request.default_sector_volatility < 0.0
        {
            return Err(CreditSimError::InvalidInput {
                field: "default_sector_volatility".into(),
                reason: "Must be a finite, non-negative number".into(),
            });
        }

        let years = request.simulation_years;
        let num_paths = request.num_simulations as usize;
        let mut warnings = Vec::new();

        // Every debtor shares the portfolio's shock-set dimensions
        let configs: Vec<SimulationConfig> = request
            .debtors
            .iter()
            .map(|d| SimulationConfig {
                simulation_years: years,
                num_simulations: request.num_simulations,
                ..d.config.clone()
            })
            .collect();
        for (config, debtor) in configs.iter().zip(&request.debtors) {
            validate_config(config)?;
            validate_loans(&debtor.loans)?;
        }

        let prepared = configs
            .iter()
            .zip(&request.debtors)
            .map(|(config, d)| self.prepare(config, &d.loans, years))
            .collect::<CreditSimResult<Vec<_>>>()?;

        let (sectors, collateral_types) =
            factor_universe(prepared.iter().map(|p| (p.config, p.loans)));
        let default_collateral_volatility = mean_collateral_volatility(&configs);
        let unmapped = collateral_types
            .iter()
            .filter(|t| !request.correlation.collateral_volatility.contains_key(*t))
            .count();
        if unmapped > 0 && collateral_volatilities_differ(&configs) {
            warn!(
                unmapped,
                mean = default_collateral_volatility,
                "debtor collateral volatilities replaced by the portfolio mean"
            );
            warnings.push(format!(
                "{unmapped} collateral type(s) without a volatility use the portfolio mean \
                 collateral volatility ({default_collateral_volatility:.4}) instead of each \
                 debtor's own"
            ));
        }
        let seed = request.seed.unwrap_or_else(rand::random);
        info!(
            debtors = prepared.len(),
            seed,
            paths = num_paths,
            years,
            sectors = sectors.len(),
            collateral_types = collateral_types.len(),
            sector_matrix = request.correlation.has_sector_correlation(),
            "starting portfolio simulation"
        );

        let shocks: ShockSet = ShockGenerator::new(seed).generate(
            num_paths,
            years as usize,
            &sectors,
            &collateral_types,
            &request.correlation,
            request.default_sector_volatility,
            default_collateral_volatility,
        );
        warnings.extend(shocks.warnings().iter().cloned());

        let simulators: Vec<DebtorSimulator<'_>> = prepared
            .iter()
            .enumerate()
            .map(|(i, p)| DebtorSimulator::new(p.config, p.loans, &p.schedules, &shocks, i))
            .collect();

        // One simulation number drives every debtor on the same shocks
        let completed = AtomicUsize::new(0);
        let per_simulation = self.map_indices(num_paths, |i| -> CreditSimResult<Vec<Option<SimulationPath>>> {
            self.check_cancelled(&completed)?;
            let row: Vec<Option<SimulationPath>> =
                simulators.iter().map(|s| self.vetted_path(s, i)).collect();
            completed.fetch_add(1, Ordering::Relaxed);
            Ok(row)
        });
        let per_simulation = per_simulation
            .into_iter()
            .collect::<CreditSimResult<Vec<_>>>()?;

        let mut excluded = 0usize;
        let mut outcomes = Vec::with_capacity(num_paths);
        let mut debtor_paths: Vec<Vec<SimulationPath>> =
            vec![Vec::with_capacity(num_paths); simulators.len()];
        for (i, row) in per_simulation.into_iter().enumerate() {
            if row.iter().any(Option::is_none) {
                excluded += row.iter().filter(|p| p.is_none()).count();
                // Incomplete simulation: keep the valid debtor paths, skip the joint outcome
                for (d, path) in row.into_iter().enumerate() {
                    if let Some(path) = path {
                        debtor_paths[d].push(path);
                    }
                }
                continue;
            }
            let debtor_losses: Vec<f64> = row
                .iter()
                .flatten()
                .map(|p| p.loss_given_default)
                .collect();
            outcomes.push(SimulationOutcome {
                simulation: i + 1,
                defaults: row.iter().flatten().filter(|p| p.default_occurred).count(),
                total_loss: debtor_losses.iter().sum(),
                debtor_losses,
            });
            for (d, path) in row.into_iter().flatten().enumerate() {
                debtor_paths[d].push(path);
            }
        }
        if outcomes.is_empty() {
            return Err(CreditSimError::InsufficientData(
                "No simulation completed for every debtor".into(),
            ));
        }
        if excluded > 0 {
            warn!(excluded, "paths excluded from portfolio statistics");
            warnings.push(format!(
                "{excluded} debtor paths excluded (non-finite values)"
            ));
        }

        let debtor_stats: Vec<DebtorStatistics> = prepared
            .iter()
            .zip(&debtor_paths)
            .map(|(p, paths)| aggregate_debtor(&p.config.debtor_id, paths, p.nominal, years))
            .collect();
        let exposures: Vec<DebtorExposure> = prepared.iter().map(debtor_exposure).collect();
        let statistics = aggregate_portfolio(debtor_stats, &exposures, &outcomes);
        info!(
            portfolio_pd = statistics.portfolio_default_probability,
            joint_pd = statistics.joint_default_probability,
            expected_loss = statistics.expected_loss,
            "portfolio simulation complete"
        );

        let output = PortfolioOutput {
            statistics,
            shock_mode: shocks.mode(),
            excluded_paths: excluded,
        };

        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Correlated Monte Carlo portfolio simulation (shared shocks per simulation number)",
            PRECISION_F64,
            &serde_json::json!({
                "debtors": request.debtors.iter().map(|d| &d.config.debtor_id).collect::<Vec<_>>(),
                "num_simulations": num_paths,
                "simulation_years": years,
                "seed": seed,
                "sectors": sectors,
                "collateral_types": collateral_types,
                "default_sector_volatility": request.default_sector_volatility,
                "default_collateral_volatility": default_collateral_volatility,
            }),
            warnings,
            elapsed,
            output,
        ))
    }
}

fn mean_collateral_volatility(configs: &[SimulationConfig]) -> f64 {
    if configs.is_empty() {
        return 0.0;
    }
    configs.iter().map(|c| c.collateral_volatility).sum::<f64>() / configs.len() as f64
}

fn collateral_volatilities_differ(configs: &[SimulationConfig]) -> bool {
    let (lo, hi) = configs
        .iter()
        .map(|c| c.collateral_volatility)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    hi - lo > 1e-12
}

fn debtor_exposure(debtor: &PreparedDebtor<'_>) -> DebtorExposure {
    let mut property_amounts = BTreeMap::new();
    for loan in debtor.loans.iter().filter(|l| l.is_portfolio_loan()) {
        let key = loan
            .property_type
            .clone()
            .unwrap_or_else(|| unassigned_key().to_string());
        *property_amounts.entry(key).or_insert(0.0) += loan.principal;
    }
    DebtorExposure {
        nominal: debtor.nominal,
        sector_weights: debtor.config.sector_weights.clone(),
        property_amounts,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Single-debtor simulation with the default collaborators.
pub fn run_simulation(
    request: &SimulationRequest,
) -> CreditSimResult<ComputationOutput<SimulationOutput>> {
    SimulationOrchestrator::default().run(request)
}

/// Portfolio simulation with the default collaborators.
pub fn run_portfolio_simulation(
    request: &PortfolioRequest,
) -> CreditSimResult<ComputationOutput<PortfolioOutput>> {
    SimulationOrchestrator::default().run_portfolio(request)
}
