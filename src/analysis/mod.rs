//! Run statistics: the result accumulator and latency percentiles.

pub mod stats;

pub use stats::{percentile, LatencySummary, RunStats};
