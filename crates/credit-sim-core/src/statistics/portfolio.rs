use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::statistics::aggregator::{percentile, DebtorStatistics};

const UNASSIGNED: &str = "unassigned";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome of one simulation number across all debtors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub simulation: usize,
    pub defaults: usize,
    pub total_loss: f64,
    /// Loss per debtor, aligned with the request's debtor order
    pub debtor_losses: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentrationEntry {
    pub name: String,
    pub amount: f64,
    pub share: f64,
}

/// Loan-amount weighted concentration by one dimension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Concentration {
    pub entries: Vec<ConcentrationEntry>,
    /// Herfindahl-Hirschman index of the shares
    pub hhi: f64,
    /// 1 / HHI
    pub effective_number: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LossDistribution {
    pub mean: f64,
    pub std_dev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioStatistics {
    pub num_simulations: usize,
    pub total_nominal: f64,
    pub debtors: Vec<DebtorStatistics>,
    /// Percent of simulations with at least one default
    pub portfolio_default_probability: f64,
    /// Percent of simulations with at least two debtors defaulting together
    pub joint_default_probability: f64,
    /// Sum of the debtors' expected losses
    pub expected_loss: f64,
    pub loss_distribution: LossDistribution,
    pub sector_concentration: Concentration,
    pub property_type_concentration: Concentration,
    /// 1 − σ(portfolio loss) / Σ σ(debtor loss)
    pub diversification_benefit: f64,
}

/// Exposure of one debtor used for concentration metrics.
#[derive(Debug, Clone, Default)]
pub struct DebtorExposure {
    /// Portfolio-loan principal
    pub nominal: f64,
    pub sector_weights: BTreeMap<String, f64>,
    /// Portfolio-loan principal by property type
    pub property_amounts: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Shares and HHI of a set of amounts. Non-positive totals yield an empty result.
pub fn concentration(amounts: BTreeMap<String, f64>) -> Concentration {
    let total: f64 = amounts.values().filter(|a| **a > 0.0).sum();
    if total <= 0.0 {
        return Concentration::default();
    }
    let mut entries: Vec<ConcentrationEntry> = amounts
        .into_iter()
        .filter(|(_, a)| *a > 0.0)
        .map(|(name, amount)| ConcentrationEntry {
            name,
            amount,
            share: amount / total,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let hhi: f64 = entries.iter().map(|e| e.share * e.share).sum();
    Concentration {
        entries,
        hhi,
        effective_number: if hhi > 0.0 { 1.0 / hhi } else { 0.0 },
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        0.0
    } else {
        values.iter().population_std_dev()
    }
}

fn loss_distribution(totals: &[f64]) -> LossDistribution {
    if totals.is_empty() {
        return LossDistribution::default();
    }
    let mut sorted = totals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    LossDistribution {
        mean: totals.iter().mean(),
        std_dev: std_dev(totals),
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        max: sorted[sorted.len() - 1],
    }
}

/// `1 − σ(Σ losses) / Σ σ(losses_i)`; 0 when no debtor has loss variance.
pub fn diversification_benefit(outcomes: &[SimulationOutcome]) -> f64 {
    let num_debtors = outcomes.first().map(|o| o.debtor_losses.len()).unwrap_or(0);
    let standalone: f64 = (0..num_debtors)
        .map(|d| {
            let losses: Vec<f64> = outcomes.iter().map(|o| o.debtor_losses[d]).collect();
            std_dev(&losses)
        })
        .sum();
    if standalone <= 0.0 {
        return 0.0;
    }
    let totals: Vec<f64> = outcomes.iter().map(|o| o.total_loss).collect();
    1.0 - std_dev(&totals) / standalone
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Combine per-debtor statistics with cross-debtor simulation outcomes.
pub fn aggregate_portfolio(
    debtors: Vec<DebtorStatistics>,
    exposures: &[DebtorExposure],
    outcomes: &[SimulationOutcome],
) -> PortfolioStatistics {
    let n = outcomes.len();
    let pct = |count: usize| {
        if n > 0 {
            count as f64 / n as f64 * 100.0
        } else {
            0.0
        }
    };

    let mut sector_amounts: BTreeMap<String, f64> = BTreeMap::new();
    let mut property_amounts: BTreeMap<String, f64> = BTreeMap::new();
    for exposure in exposures {
        if exposure.sector_weights.is_empty() {
            *sector_amounts.entry(UNASSIGNED.to_string()).or_default() += exposure.nominal;
        }
        for (sector, weight) in &exposure.sector_weights {
            *sector_amounts.entry(sector.clone()).or_default() += exposure.nominal * weight;
        }
        for (property, amount) in &exposure.property_amounts {
            *property_amounts.entry(property.clone()).or_default() += amount;
        }
    }

    let totals: Vec<f64> = outcomes.iter().map(|o| o.total_loss).collect();

    PortfolioStatistics {
        num_simulations: n,
        total_nominal: exposures.iter().map(|e| e.nominal).sum(),
        expected_loss: debtors.iter().map(|d| d.expected_loss).sum(),
        debtors,
        portfolio_default_probability: pct(outcomes.iter().filter(|o| o.defaults >= 1).count()),
        joint_default_probability: pct(outcomes.iter().filter(|o| o.defaults >= 2).count()),
        loss_distribution: loss_distribution(&totals),
        sector_concentration: concentration(sector_amounts),
        property_type_concentration: concentration(property_amounts),
        diversification_benefit: diversification_benefit(outcomes),
    }
}

/// Key used for loans without a property type.
pub fn unassigned_key() -> &'static str {
    UNASSIGNED
}
