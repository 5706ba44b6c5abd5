//! Final run summary: computation and formatting.

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::analysis::{LatencySummary, RunStats};
use crate::config::{AuthMethod, RunConfig};

const RULE: &str = "========================================";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorCount {
    pub tag: String,
    pub count: usize,
    pub percent_of_failures: f64,
}

/// Everything printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub auth_method: AuthMethod,
    pub auth_description: String,
    pub credential_source: String,
    pub target_url: String,
    pub target_audience: String,
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_percent: f64,
    pub failure_percent: f64,
    pub total_time_secs: f64,
    pub requests_per_second: f64,
    pub latency: Option<LatencySummary>,
    /// Sorted by count, highest first. Empty when nothing failed.
    pub errors: Vec<ErrorCount>,
}

impl Summary {
    pub fn new(config: &RunConfig, stats: &RunStats, wall_time: Duration) -> Self {
        let total = stats.total();
        let total_time_secs = wall_time.as_secs_f64();
        let requests_per_second = if total_time_secs > 0.0 {
            total as f64 / total_time_secs
        } else {
            0.0
        };

        let mut errors: Vec<ErrorCount> = stats
            .errors()
            .iter()
            .map(|(tag, &count)| ErrorCount {
                tag: tag.to_string(),
                count,
                percent_of_failures: percent(count, stats.failures()),
            })
            .collect();
        errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));

        let credential_source = match config.static_token {
            Some(_) => "static bearer token".to_string(),
            None => config.key_file.display().to_string(),
        };

        Self {
            auth_method: config.auth_method,
            auth_description: config.auth_method.describe(&config.secondary_header),
            credential_source,
            target_url: config.target_url.clone(),
            target_audience: config.target_audience.clone(),
            total_requests: total,
            successful: stats.successes(),
            failed: stats.failures(),
            success_percent: percent(stats.successes(), total),
            failure_percent: percent(stats.failures(), total),
            total_time_secs,
            requests_per_second,
            latency: stats.latency(),
            errors,
        }
    }

    /// Render the human-readable summary block.
    pub fn format_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "           LOAD TEST SUMMARY            ");
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "Authentication Method: {}", self.auth_description);
        let _ = writeln!(out, "Service Key: {}", self.credential_source);
        let _ = writeln!(out, "Target URL: {}", self.target_url);
        let _ = writeln!(out, "Target Audience: {}", self.target_audience);
        let _ = writeln!(out, "Total Requests: {}", self.total_requests);
        let _ = writeln!(out, "Successful: {} ({:.2}%)", self.successful, self.success_percent);
        let _ = writeln!(out, "Failed: {} ({:.2}%)", self.failed, self.failure_percent);
        let _ = writeln!(out, "Total Time: {:.2}s", self.total_time_secs);
        let _ = writeln!(out, "Requests Per Second: {:.2}", self.requests_per_second);

        if let Some(latency) = &self.latency {
            let _ = writeln!(out, "\nResponse Times:");
            let _ = writeln!(out, "  Average: {:.2}ms", latency.average_ms);
            let _ = writeln!(out, "  Median (P50): {}ms", latency.p50_ms);
            let _ = writeln!(out, "  P90: {}ms", latency.p90_ms);
            let _ = writeln!(out, "  P95: {}ms", latency.p95_ms);
            let _ = writeln!(out, "  P99: {}ms", latency.p99_ms);
            let _ = writeln!(out, "  Min: {}ms", latency.min_ms);
            let _ = writeln!(out, "  Max: {}ms", latency.max_ms);
        }

        if !self.errors.is_empty() {
            let _ = writeln!(out, "\nError Types:");
            for error in &self.errors {
                let _ = writeln!(
                    out,
                    "  {}: {} ({:.2}%)",
                    error.tag, error.count, error.percent_of_failures
                );
            }
        }

        let _ = write!(out, "{}", RULE);
        out
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
