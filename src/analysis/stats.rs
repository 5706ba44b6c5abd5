use crate::probes::{ErrorTag, Outcome, RequestResult};
use serde::Serialize;
use std::collections::HashMap;

/// Accumulated outcomes of a run.
///
/// Owned by the runner and updated only from its join step, one result at a
/// time, so no locking is involved.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    successes: usize,
    failures: usize,
    elapsed_ms: Vec<u64>,
    errors: HashMap<ErrorTag, usize>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result into the totals.
    pub fn record(&mut self, result: RequestResult) {
        match result.outcome {
            Outcome::Success { .. } => self.successes += 1,
            Outcome::Failure { tag } => {
                self.failures += 1;
                *self.errors.entry(tag).or_insert(0) += 1;
            }
        }
        self.elapsed_ms.push(result.elapsed_ms);
    }

    pub fn successes(&self) -> usize {
        self.successes
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn total(&self) -> usize {
        self.successes + self.failures
    }

    /// Elapsed times in the order results were recorded.
    pub fn elapsed_ms(&self) -> &[u64] {
        &self.elapsed_ms
    }

    pub fn errors(&self) -> &HashMap<ErrorTag, usize> {
        &self.errors
    }

    /// Latency summary over every recorded request, or `None` if empty.
    pub fn latency(&self) -> Option<LatencySummary> {
        let mut sorted = self.elapsed_ms.clone();
        sorted.sort_unstable();
        LatencySummary::from_sorted(&sorted)
    }
}

/// Nearest-rank percentile: the element at `floor(len * p)`, clamped to the
/// last index. `sorted` must be ascending. Returns 0 for an empty slice.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64) * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub average_ms: f64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencySummary {
    pub fn from_sorted(sorted: &[u64]) -> Option<Self> {
        let (&min_ms, &max_ms) = (sorted.first()?, sorted.last()?);
        let sum: u64 = sorted.iter().sum();

        Some(Self {
            average_ms: sum as f64 / sorted.len() as f64,
            p50_ms: percentile(sorted, 0.50),
            p90_ms: percentile(sorted, 0.90),
            p95_ms: percentile(sorted, 0.95),
            p99_ms: percentile(sorted, 0.99),
            min_ms,
            max_ms,
        })
    }
}
