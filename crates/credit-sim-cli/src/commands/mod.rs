pub mod portfolio;
pub mod schedule;
pub mod simulate;
