//! Local statistical analysis of collected metric data

mod comparator;
mod stats;

pub use comparator::{LocalComparator, RiskThresholds};
pub use stats::SampleStats;
