use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::simulation::cholesky::{aligned_matrix, cholesky_lower, correlate};
use crate::simulation::config::CorrelationInputs;
use crate::simulation::random::box_muller;

/// How sector and collateral shocks were generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShockMode {
    /// Cholesky-correlated sectors and/or sector-blended collateral shocks
    Correlated,
    /// No correlation data: every factor drawn independently
    Independent,
}

/// Frozen shocks for every (path, year, factor).
///
/// Flat storage indexed `[path][year][factor]`; factor ordering is fixed by
/// `sectors` and `collateral_types`.
#[derive(Debug, Clone)]
pub struct ShockSet {
    num_paths: usize,
    num_years: usize,
    sectors: Vec<String>,
    collateral_types: Vec<String>,
    sector_shocks: Vec<f64>,
    collateral_shocks: Vec<f64>,
    mode: ShockMode,
    seed: u64,
    warnings: Vec<String>,
}

impl ShockSet {
    pub fn num_paths(&self) -> usize {
        self.num_paths
    }

    pub fn num_years(&self) -> usize {
        self.num_years
    }

    pub fn sectors(&self) -> &[String] {
        &self.sectors
    }

    pub fn collateral_types(&self) -> &[String] {
        &self.collateral_types
    }

    pub fn mode(&self) -> ShockMode {
        self.mode
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn sector_index(&self, sector: &str) -> Option<usize> {
        self.sectors.iter().position(|s| s == sector)
    }

    pub fn collateral_index(&self, collateral_type: &str) -> Option<usize> {
        self.collateral_types.iter().position(|c| c == collateral_type)
    }

    /// Sector shocks for a 0-based path and 0-based year.
    pub fn sector_shocks(&self, path: usize, year: usize) -> &[f64] {
        let n = self.sectors.len();
        let start = (path * self.num_years + year) * n;
        &self.sector_shocks[start..start + n]
    }

    /// Collateral-type shocks for a 0-based path and 0-based year.
    pub fn collateral_shocks(&self, path: usize, year: usize) -> &[f64] {
        let n = self.collateral_types.len();
        let start = (path * self.num_years + year) * n;
        &self.collateral_shocks[start..start + n]
    }

    /// Named view of one (path, year), for serialisation and debugging.
    pub fn snapshot(&self, path: usize, year: usize) -> ShockSnapshot {
        ShockSnapshot {
            sectors: self
                .sectors
                .iter()
                .cloned()
                .zip(self.sector_shocks(path, year).iter().copied())
                .collect(),
            collateral: self
                .collateral_types
                .iter()
                .cloned()
                .zip(self.collateral_shocks(path, year).iter().copied())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShockSnapshot {
    pub sectors: BTreeMap<String, f64>,
    pub collateral: BTreeMap<String, f64>,
}

/// Sector → collateral blend weights for one collateral type.
struct CollateralBlend {
    volatility: f64,
    /// (sector index, correlation) for non-zero correlations
    links: Vec<(usize, f64)>,
    total_weight: f64,
}

/// Draws correlated sector and collateral shocks from one owned generator.
pub struct ShockGenerator {
    rng: StdRng,
    seed: u64,
}

impl ShockGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Generate the full shock set.
    ///
    /// Volatilities missing from `inputs` fall back to the supplied defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        mut self,
        num_paths: usize,
        num_years: usize,
        sectors: &[String],
        collateral_types: &[String],
        inputs: &CorrelationInputs,
        default_sector_volatility: f64,
        default_collateral_volatility: f64,
    ) -> ShockSet {
        let mut warnings = Vec::new();
        let ns = sectors.len();
        let nc = collateral_types.len();

        let sector_factor = match inputs.sector_correlation.as_ref() {
            Some(matrix) if !matrix.is_empty() && ns > 0 => {
                let (aligned, repaired) = aligned_matrix(sectors, matrix);
                if repaired {
                    warnings.push(
                        "Sector correlation matrix was asymmetric or out of range; repaired"
                            .to_string(),
                    );
                }
                Some(cholesky_lower(&aligned))
            }
            _ => None,
        };

        let sector_vols: Vec<f64> = sectors
            .iter()
            .map(|s| {
                inputs
                    .sector_volatility
                    .get(s)
                    .copied()
                    .unwrap_or(default_sector_volatility)
            })
            .collect();

        let blends: Vec<CollateralBlend> = collateral_types
            .iter()
            .map(|c| {
                let links: Vec<(usize, f64)> = inputs
                    .sector_collateral_correlation
                    .get(c)
                    .map(|by_sector| {
                        by_sector
                            .iter()
                            .filter(|(_, rho)| **rho != 0.0 && rho.is_finite())
                            .filter_map(|(s, rho)| {
                                sectors.iter().position(|x| x == s).map(|i| (i, *rho))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let total_weight = links.iter().map(|(_, rho)| rho.abs()).sum();
                CollateralBlend {
                    volatility: inputs
                        .collateral_volatility
                        .get(c)
                        .copied()
                        .unwrap_or(default_collateral_volatility),
                    links,
                    total_weight,
                }
            })
            .collect();

        let collateral_linked = blends.iter().any(|b| !b.links.is_empty());
        let mode = if sector_factor.is_some() || collateral_linked {
            ShockMode::Correlated
        } else {
            ShockMode::Independent
        };
        if ns > 1 && sector_factor.is_none() {
            warnings.push(format!(
                "No sector correlation matrix supplied; {ns} sectors shocked independently"
            ));
        }
        let unlinked = blends.iter().filter(|b| b.links.is_empty()).count();
        if unlinked > 0 && ns > 0 {
            warnings.push(format!(
                "{unlinked} collateral type(s) have no sector correlation; shocked independently"
            ));
        }
        for w in &warnings {
            warn!(seed = self.seed, "{w}");
        }

        let mut sector_shocks = Vec::with_capacity(num_paths * num_years * ns);
        let mut collateral_shocks = Vec::with_capacity(num_paths * num_years * nc);
        let mut independent = vec![0.0_f64; ns];
        let mut correlated = vec![0.0_f64; ns];

        for _path in 0..num_paths {
            for _year in 0..num_years {
                for z in independent.iter_mut() {
                    *z = box_muller(&mut self.rng);
                }
                match &sector_factor {
                    Some(l) => correlate(l, &independent, &mut correlated),
                    None => correlated.copy_from_slice(&independent),
                }
                let year_start = sector_shocks.len();
                sector_shocks.extend(correlated.iter().zip(&sector_vols).map(|(z, v)| z * v));

                for blend in &blends {
                    let idiosyncratic = box_muller(&mut self.rng) * blend.volatility;
                    let shock = if blend.links.is_empty() || blend.total_weight <= 0.0 {
                        idiosyncratic
                    } else {
                        let year_sectors = &sector_shocks[year_start..year_start + ns];
                        let sector_part = blend
                            .links
                            .iter()
                            .map(|(i, rho)| rho * year_sectors[*i])
                            .sum::<f64>()
                            / blend.total_weight;
                        let correlation_strength = blend.total_weight.min(1.0);
                        let independent_strength =
                            (1.0 - correlation_strength * correlation_strength)
                                .max(0.0)
                                .sqrt();
                        correlation_strength * sector_part + independent_strength * idiosyncratic
                    };
                    collateral_shocks.push(shock);
                }
            }
        }

        ShockSet {
            num_paths,
            num_years,
            sectors: sectors.to_vec(),
            collateral_types: collateral_types.to_vec(),
            sector_shocks,
            collateral_shocks,
            mode,
            seed: self.seed,
            warnings,
        }
    }
}
