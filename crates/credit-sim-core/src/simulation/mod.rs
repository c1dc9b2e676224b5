pub mod cancellation;
pub mod cholesky;
pub mod config;
pub mod debtor;
pub mod observer;
pub mod orchestrator;
pub mod random;
pub mod recovery;
pub mod shocks;
