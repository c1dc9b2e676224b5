use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::simulation::debtor::{SimulationPath, YearResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Percentile band for one metric in one year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    pub mean: f64,
    pub p5: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
}

impl PercentileBand {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            mean: values.iter().mean(),
            p5: percentile(&values, 5.0),
            p10: percentile(&values, 10.0),
            p50: percentile(&values, 50.0),
            p90: percentile(&values, 90.0),
            p95: percentile(&values, 95.0),
        }
    }
}

/// Year-by-year distribution of the simulated financials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearStatistics {
    pub year: u32,
    pub revenue: PercentileBand,
    pub ebitda: PercentileBand,
    pub equity: PercentileBand,
    pub debt: PercentileBand,
    pub liquid_assets: PercentileBand,
    /// Percent of paths defaulting in this year
    pub default_probability: f64,
    /// Percent of paths defaulted by the end of this year
    pub cumulative_default_probability: f64,
}

/// Lender return on the portfolio loans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoiMetrics {
    pub nominal_amount: f64,
    pub mean_interest_earned: f64,
    pub median_interest_earned: f64,
    /// (median interest earned - expected loss) / nominal
    pub roi: f64,
    pub annualized_roi: f64,
}

/// Representative paths for visualisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePaths {
    pub worst: SimulationPath,
    pub median: SimulationPath,
    pub best: SimulationPath,
}

/// Terminal and per-year statistics for one debtor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtorStatistics {
    pub debtor_id: String,
    pub num_paths: usize,
    pub defaults: usize,
    /// Percent (0-100)
    pub probability_of_default: f64,
    /// Mean loss amount over defaulted paths
    pub average_lgd: f64,
    pub median_lgd: f64,
    pub average_lgd_pct: f64,
    pub average_exposure_at_default: f64,
    /// probability_of_default / 100 × average_lgd
    pub expected_loss: f64,
    pub years: Vec<YearStatistics>,
    pub roi: RoiMetrics,
    pub sample_paths: Option<SamplePaths>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Percentile of a **sorted** slice, interpolating linearly between ranks
/// `floor(p/100·(n−1))` and `ceil(p/100·(n−1))`. Empty input yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            if lower == upper {
                sorted[lower]
            } else {
                let frac = rank - lower as f64;
                sorted[lower] * (1.0 - frac) + sorted[upper] * frac
            }
        }
    }
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().mean()
    }
}

fn band(paths: &[SimulationPath], year: usize, metric: fn(&YearResult) -> f64) -> PercentileBand {
    PercentileBand::from_values(
        paths
            .iter()
            .filter_map(|p| p.years.get(year))
            .map(metric)
            .collect(),
    )
}

fn sample_paths(paths: &[SimulationPath]) -> Option<SamplePaths> {
    let by_equity = |a: &&SimulationPath, b: &&SimulationPath| {
        a.terminal_equity()
            .partial_cmp(&b.terminal_equity())
            .unwrap_or(std::cmp::Ordering::Equal)
    };

    let best = paths.iter().max_by(by_equity)?;
    let worst = if paths.iter().any(|p| p.default_occurred) {
        paths
            .iter()
            .filter(|p| p.default_occurred)
            .max_by(|a, b| {
                a.loss_given_default
                    .partial_cmp(&b.loss_given_default)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?
    } else {
        paths.iter().min_by(by_equity)?
    };

    let equities = sorted(paths.iter().map(SimulationPath::terminal_equity).collect());
    let median_equity = percentile(&equities, 50.0);
    let median = paths.iter().min_by(|a, b| {
        let da = (a.terminal_equity() - median_equity).abs();
        let db = (b.terminal_equity() - median_equity).abs();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    })?;

    Some(SamplePaths {
        worst: worst.clone(),
        median: median.clone(),
        best: best.clone(),
    })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Reduce a completed set of paths for one debtor.
///
/// `nominal_amount` is the principal of the debtor's portfolio loans and
/// `years` the simulation horizon used to annualise ROI.
pub fn aggregate_debtor(
    debtor_id: &str,
    paths: &[SimulationPath],
    nominal_amount: f64,
    years: u32,
) -> DebtorStatistics {
    let n = paths.len();
    let defaulted: Vec<&SimulationPath> = paths.iter().filter(|p| p.default_occurred).collect();
    let defaults = defaulted.len();

    let probability_of_default = if n > 0 {
        defaults as f64 / n as f64 * 100.0
    } else {
        0.0
    };

    let losses: Vec<f64> = defaulted.iter().map(|p| p.loss_given_default).collect();
    let loss_pcts: Vec<f64> = defaulted.iter().map(|p| p.loss_given_default_pct).collect();
    let exposures: Vec<f64> = defaulted.iter().map(|p| p.exposure_at_default).collect();
    let average_lgd = mean_or_zero(&losses);
    let median_lgd = percentile(&sorted(losses), 50.0);
    let expected_loss = probability_of_default / 100.0 * average_lgd;

    let horizon = paths.iter().map(|p| p.years.len()).max().unwrap_or(0);
    let mut cumulative = 0usize;
    let year_stats = (0..horizon)
        .map(|y| {
            let year_number = y as u32 + 1;
            let defaults_this_year = defaulted
                .iter()
                .filter(|p| p.default_year == Some(year_number))
                .count();
            cumulative += defaults_this_year;
            let pct = |count: usize| {
                if n > 0 {
                    count as f64 / n as f64 * 100.0
                } else {
                    0.0
                }
            };
            YearStatistics {
                year: year_number,
                revenue: band(paths, y, |r| r.revenue),
                ebitda: band(paths, y, |r| r.ebitda),
                equity: band(paths, y, |r| r.equity),
                debt: band(paths, y, |r| r.debt),
                liquid_assets: band(paths, y, |r| r.liquid_assets),
                default_probability: pct(defaults_this_year),
                cumulative_default_probability: pct(cumulative),
            }
        })
        .collect();

    let interest = sorted(paths.iter().map(|p| p.total_interest_earned).collect());
    let median_interest_earned = percentile(&interest, 50.0);
    let roi = if nominal_amount > 0.0 {
        (median_interest_earned - expected_loss) / nominal_amount
    } else {
        0.0
    };

    DebtorStatistics {
        debtor_id: debtor_id.to_string(),
        num_paths: n,
        defaults,
        probability_of_default,
        average_lgd,
        median_lgd,
        average_lgd_pct: mean_or_zero(&loss_pcts),
        average_exposure_at_default: mean_or_zero(&exposures),
        expected_loss,
        years: year_stats,
        roi: RoiMetrics {
            nominal_amount,
            mean_interest_earned: mean_or_zero(&interest),
            median_interest_earned,
            roi,
            annualized_roi: if years > 0 { roi / years as f64 } else { 0.0 },
        },
        sample_paths: sample_paths(paths),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
