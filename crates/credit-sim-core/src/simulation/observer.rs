//! Observability hooks for simulation runs.
//!
//! The engine reports through a [`SimulationObserver`] instead of printing.
//! [`TracingObserver`] forwards events to `tracing`; [`MetricsObserver`]
//! keeps in-process counters and an LGD histogram.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::simulation::debtor::SimulationPath;

const LGD_BUCKETS: usize = 10;

/// Receives events from a simulation run. All methods default to no-ops.
pub trait SimulationObserver: Send + Sync {
    fn on_path_completed(&self, _debtor_id: &str, _path: &SimulationPath) {}

    fn on_default(&self, _debtor_id: &str, _path: &SimulationPath) {}

    fn on_path_excluded(&self, _debtor_id: &str, _path_number: usize, _reason: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SimulationObserver for NoopObserver {}

/// Emits `tracing` events for defaults and excluded paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SimulationObserver for TracingObserver {
    fn on_default(&self, debtor_id: &str, path: &SimulationPath) {
        debug!(
            debtor_id,
            path = path.path_number,
            year = path.default_year,
            loss = path.loss_given_default,
            "default"
        );
    }

    fn on_path_excluded(&self, debtor_id: &str, path_number: usize, reason: &str) {
        warn!(debtor_id, path = path_number, reason, "path excluded");
    }
}

/// Snapshot of [`MetricsObserver`] counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub paths_completed: u64,
    pub defaults: u64,
    pub paths_excluded: u64,
    /// Counts of LGD% in ten 10-point buckets; 100% lands in the last one
    pub lgd_pct_histogram: Vec<u64>,
}

/// Lock-free counters for path outcomes.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    paths_completed: AtomicU64,
    defaults: AtomicU64,
    paths_excluded: AtomicU64,
    lgd_buckets: [AtomicU64; LGD_BUCKETS],
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            paths_completed: self.paths_completed.load(Ordering::Relaxed),
            defaults: self.defaults.load(Ordering::Relaxed),
            paths_excluded: self.paths_excluded.load(Ordering::Relaxed),
            lgd_pct_histogram: self
                .lgd_buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

impl SimulationObserver for MetricsObserver {
    fn on_path_completed(&self, _debtor_id: &str, _path: &SimulationPath) {
        self.paths_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_default(&self, _debtor_id: &str, path: &SimulationPath) {
        self.defaults.fetch_add(1, Ordering::Relaxed);
        let bucket = ((path.loss_given_default_pct / 10.0).floor().max(0.0) as usize)
            .min(LGD_BUCKETS - 1);
        self.lgd_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    fn on_path_excluded(&self, _debtor_id: &str, _path_number: usize, _reason: &str) {
        self.paths_excluded.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaulted(lgd_pct: f64) -> SimulationPath {
        SimulationPath {
            path_number: 1,
            years: Vec::new(),
            default_occurred: true,
            default_year: Some(1),
            exposure_at_default: 100.0,
            collateral_value_at_default: 0.0,
            recovered_amount: 100.0 - lgd_pct,
            loss_given_default: lgd_pct,
            loss_given_default_pct: lgd_pct,
            total_interest_earned: 0.0,
        }
    }

    #[test]
    fn test_histogram_buckets() {
        let m = MetricsObserver::new();
        for pct in [0.0, 9.99, 10.0, 55.0, 100.0] {
            m.on_default("d", &defaulted(pct));
        }
        let snap = m.snapshot();
        assert_eq!(snap.defaults, 5);
        assert_eq!(snap.lgd_pct_histogram[0], 2);
        assert_eq!(snap.lgd_pct_histogram[1], 1);
        assert_eq!(snap.lgd_pct_histogram[5], 1);
        assert_eq!(snap.lgd_pct_histogram[9], 1);
    }

    #[test]
    fn test_counters_through_trait_object() {
        let observers: Vec<Box<dyn SimulationObserver>> =
            vec![Box::new(NoopObserver), Box::new(MetricsObserver::new())];
        for o in &observers {
            o.on_path_completed("d", &defaulted(0.0));
            o.on_path_excluded("d", 2, "non-finite values");
        }
        let m = MetricsObserver::new();
        m.on_path_completed("d", &defaulted(0.0));
        m.on_path_excluded("d", 2, "non-finite values");
        let snap = m.snapshot();
        assert_eq!(snap.paths_completed, 1);
        assert_eq!(snap.paths_excluded, 1);
        assert_eq!(snap.defaults, 0);
    }
}
