//! authload -- batched bearer-token load testing for a single HTTP endpoint.
//!
//! This crate resolves a run configuration, mints bearer tokens from a
//! service account key, drives waves of concurrent authenticated GET requests,
//! and summarises latency and failures.

pub mod analysis;
pub mod config;
pub mod probes;
pub mod report;
pub mod runner;
pub mod token;

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;

use config::RunConfig;
use probes::HttpExecutor;
use report::Summary;
use runner::Runner;
use token::{CachedTokenSource, ServiceAccountTokenSource, StaticTokenSource, TokenSource};

/// The token source selected by `config`: a static token if one was given,
/// otherwise ID tokens minted from the service account key file.
pub fn token_source(config: &RunConfig, client: Client) -> Arc<dyn TokenSource> {
    match &config.static_token {
        Some(token) => Arc::new(StaticTokenSource::new(token.clone())),
        None => Arc::new(CachedTokenSource::new(ServiceAccountTokenSource::new(
            config.key_file.clone(),
            client,
        ))),
    }
}

/// Run a complete load test and return its summary.
pub async fn run(config: &RunConfig) -> Result<Summary> {
    let client = Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let tokens = token_source(config, client.clone());
    let executor = HttpExecutor::new(config, client, tokens)?;

    tracing::info!(
        target_url = %config.target_url,
        total = config.total_requests,
        concurrency = config.concurrency,
        delay_ms = config.delay_ms,
        auth_method = %config.auth_method,
        "Starting load test"
    );
    let outcome = Runner::new(executor, config).run().await;
    tracing::info!(
        successes = outcome.stats.successes(),
        failures = outcome.stats.failures(),
        wall_ms = outcome.wall_time.as_millis() as u64,
        "Load test finished"
    );

    Ok(Summary::new(config, &outcome.stats, outcome.wall_time))
}
