pub mod aggregator;
pub mod portfolio;
