use std::process::ExitCode;

use anyhow::Result;
use authload::config::{CliArgs, RunConfig};
use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // `.env` feeds the environment layer, so it is loaded before resolution.
    let dotenv_path = dotenvy::dotenv().ok();

    let config = match RunConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing; RUST_LOG wins over the verbosity flags.
    let default_filter = if config.output.detailed { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = dotenv_path {
        debug!(path = %path.display(), "loaded .env file");
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Load test failed with error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &RunConfig) -> Result<()> {
    let summary = authload::run(config).await?;

    if config.output.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("\n{}", summary.format_text());
        println!("Load test completed");
    }
    Ok(())
}
