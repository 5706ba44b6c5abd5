//! Run configuration for a load test.
//!
//! Three sources are layered in increasing precedence: compiled-in defaults,
//! environment variables (optionally seeded from a `.env` file), and
//! command-line flags. [`RunConfig::resolve`] is a pure function over all
//! three, so the same layering can be exercised in tests without touching the
//! process environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Bad user input. Fatal: the process exits before any request is sent.
    #[error("{0}")]
    InvalidArgument(String),
}

// ---------------------------------------------------------------------------
// Auth method
// ---------------------------------------------------------------------------

/// Which header(s) carry the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// `Authorization` only.
    Auth,
    /// The secondary header only.
    XAuth,
    /// A placeholder under `Authorization`, the real token under the
    /// secondary header.
    Both,
}

impl AuthMethod {
    /// Human-readable description for the summary header.
    pub fn describe(&self, secondary_header: &str) -> String {
        match self {
            AuthMethod::Auth => "Authorization header only".to_string(),
            AuthMethod::XAuth => format!("{} header only", secondary_header),
            AuthMethod::Both => format!("Both headers ({} takes precedence)", secondary_header),
        }
    }
}

impl FromStr for AuthMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auth" => Ok(AuthMethod::Auth),
            "x-auth" => Ok(AuthMethod::XAuth),
            "both" => Ok(AuthMethod::Both),
            other => Err(ConfigError::InvalidArgument(format!(
                "Invalid auth method: {}. Must be 'auth', 'x-auth', or 'both'",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Auth => write!(f, "auth"),
            AuthMethod::XAuth => write!(f, "x-auth"),
            AuthMethod::Both => write!(f, "both"),
        }
    }
}

// ---------------------------------------------------------------------------
// Command-line flags
// ---------------------------------------------------------------------------

const ENV_HELP: &str = "\
Environment variables (can also be set in a .env file):
  TARGET_AUDIENCE           Target audience for authentication
  API_ENDPOINT              API endpoint path
  SERVICE_KEY_PATH          Path to the service account key file
  AUTH_METHOD               Authentication method: 'auth', 'x-auth', or 'both'
  CONCURRENT_REQUESTS       Number of concurrent requests
  TOTAL_REQUESTS            Total number of requests
  DELAY_BETWEEN_BATCHES     Delay between batches in ms
  DETAILED_LOGGING          Enable detailed logging (true/false)
  SUMMARY_ONLY              Show only the final summary (true/false)
  SECONDARY_AUTH_HEADER     Name of the secondary authorization header
  BEARER_TOKEN              Pre-minted bearer token (skips the key file)

Flags override environment variables, which override the defaults.";

/// Command-line flags. Every value flag is optional so that an absent flag
/// falls through to the environment and then to the defaults.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "authload",
    about = "Batched bearer-token load testing for a single authenticated HTTP endpoint",
    version,
    long_about = None,
    after_help = ENV_HELP
)]
pub struct CliArgs {
    /// Number of concurrent requests per batch (default: 10)
    #[arg(long, value_name = "N")]
    pub concurrent: Option<usize>,

    /// Total number of requests (default: 100)
    #[arg(long, value_name = "N")]
    pub total: Option<usize>,

    /// Delay between batches in ms (default: 1000)
    #[arg(long, value_name = "MS")]
    pub delay: Option<u64>,

    /// Authentication method: 'auth', 'x-auth', or 'both' (default: 'both')
    #[arg(long, value_name = "METHOD")]
    pub auth_method: Option<String>,

    /// Path to the service account key file (default: './service_key.json')
    #[arg(long, value_name = "PATH")]
    pub key_file: Option<PathBuf>,

    /// Target audience for authentication
    #[arg(long, value_name = "URL")]
    pub target_audience: Option<String>,

    /// API endpoint path (default: '/test/auth')
    #[arg(long, value_name = "PATH")]
    pub api_endpoint: Option<String>,

    /// Secondary authorization header name (default: 'X-Custom-Authorization')
    #[arg(long, value_name = "NAME")]
    pub secondary_header: Option<String>,

    /// Use this bearer token instead of minting one from the key file
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Enable detailed logging for each request
    #[arg(long)]
    pub detailed: bool,

    /// Show only the final summary
    #[arg(long)]
    pub summary_only: bool,

    /// Print the final summary as JSON
    #[arg(long)]
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Raw environment values, unparsed. Empty values count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub target_audience: Option<String>,
    pub api_endpoint: Option<String>,
    pub service_key_path: Option<String>,
    pub auth_method: Option<String>,
    pub concurrent_requests: Option<String>,
    pub total_requests: Option<String>,
    pub delay_between_batches: Option<String>,
    pub detailed_logging: Option<String>,
    pub summary_only: Option<String>,
    pub secondary_auth_header: Option<String>,
    pub bearer_token: Option<String>,
}

impl EnvOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            target_audience: get("TARGET_AUDIENCE"),
            api_endpoint: get("API_ENDPOINT"),
            service_key_path: get("SERVICE_KEY_PATH"),
            auth_method: get("AUTH_METHOD"),
            concurrent_requests: get("CONCURRENT_REQUESTS"),
            total_requests: get("TOTAL_REQUESTS"),
            delay_between_batches: get("DELAY_BETWEEN_BATCHES"),
            detailed_logging: get("DETAILED_LOGGING"),
            summary_only: get("SUMMARY_ONLY"),
            secondary_auth_header: get("SECONDARY_AUTH_HEADER"),
            bearer_token: get("BEARER_TOKEN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Compiled-in defaults, the lowest-precedence layer.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub concurrency: usize,
    pub total_requests: usize,
    pub delay_ms: u64,
    pub auth_method: AuthMethod,
    pub key_file: PathBuf,
    pub target_audience: String,
    pub api_endpoint: String,
    pub secondary_header: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            concurrency: 10,
            total_requests: 100,
            delay_ms: 1000,
            auth_method: AuthMethod::Both,
            key_file: PathBuf::from("./service_key.json"),
            target_audience: "http://localhost:8080".to_string(),
            api_endpoint: "/test/auth".to_string(),
            secondary_header: "X-Custom-Authorization".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

/// Console output switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Per-request logging.
    pub detailed: bool,
    /// Suppress progress output; print only the summary.
    pub summary_only: bool,
    /// Print the summary as JSON.
    pub json: bool,
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub concurrency: usize,
    pub total_requests: usize,
    pub delay_ms: u64,
    pub auth_method: AuthMethod,
    pub target_audience: String,
    pub api_endpoint: String,
    /// `target_audience` followed by `api_endpoint`.
    pub target_url: String,
    pub key_file: PathBuf,
    pub secondary_header: String,
    pub static_token: Option<String>,
    pub output: OutputOptions,
}

impl RunConfig {
    /// Read the process environment and resolve it against `cli`.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        Self::resolve(&Defaults::default(), &EnvOverrides::from_env(), cli)
    }

    /// Layer `defaults` < `env` < `cli` into a validated config.
    pub fn resolve(
        defaults: &Defaults,
        env: &EnvOverrides,
        cli: &CliArgs,
    ) -> Result<Self, ConfigError> {
        let concurrency = match cli.concurrent {
            Some(n) => n,
            None => env_number("CONCURRENT_REQUESTS", env.concurrent_requests.as_deref())?
                .unwrap_or(defaults.concurrency),
        };
        let total_requests = match cli.total {
            Some(n) => n,
            None => env_number("TOTAL_REQUESTS", env.total_requests.as_deref())?
                .unwrap_or(defaults.total_requests),
        };
        let delay_ms = match cli.delay {
            Some(ms) => ms,
            None => env_number("DELAY_BETWEEN_BATCHES", env.delay_between_batches.as_deref())?
                .unwrap_or(defaults.delay_ms),
        };

        if concurrency == 0 {
            return Err(ConfigError::InvalidArgument(
                "Concurrent requests must be a positive integer".to_string(),
            ));
        }
        if total_requests == 0 {
            return Err(ConfigError::InvalidArgument(
                "Total requests must be a positive integer".to_string(),
            ));
        }

        let auth_method = match cli.auth_method.as_deref().or(env.auth_method.as_deref()) {
            Some(raw) => raw.parse()?,
            None => defaults.auth_method,
        };

        let target_audience = cli
            .target_audience
            .clone()
            .or_else(|| env.target_audience.clone())
            .unwrap_or_else(|| defaults.target_audience.clone());
        let api_endpoint = cli
            .api_endpoint
            .clone()
            .or_else(|| env.api_endpoint.clone())
            .unwrap_or_else(|| defaults.api_endpoint.clone());
        let key_file = cli
            .key_file
            .clone()
            .or_else(|| env.service_key_path.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| defaults.key_file.clone());
        let secondary_header = cli
            .secondary_header
            .clone()
            .or_else(|| env.secondary_auth_header.clone())
            .unwrap_or_else(|| defaults.secondary_header.clone());
        if reqwest::header::HeaderName::from_bytes(secondary_header.as_bytes()).is_err()
            || secondary_header.eq_ignore_ascii_case("authorization")
        {
            return Err(ConfigError::InvalidArgument(format!(
                "Invalid secondary header name: {}",
                secondary_header
            )));
        }
        let static_token = cli.token.clone().or_else(|| env.bearer_token.clone());

        let output = OutputOptions {
            detailed: cli.detailed || is_true(env.detailed_logging.as_deref()),
            summary_only: cli.summary_only || is_true(env.summary_only.as_deref()),
            json: cli.json,
        };

        let target_url = format!("{}{}", target_audience, api_endpoint);

        Ok(Self {
            concurrency,
            total_requests,
            delay_ms,
            auth_method,
            target_audience,
            api_endpoint,
            target_url,
            key_file,
            secondary_header,
            static_token,
            output,
        })
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

fn env_number<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, ConfigError> {
    raw.map(|v| {
        v.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidArgument(format!(
                "{} must be a non-negative integer, got '{}'",
                name, v
            ))
        })
    })
    .transpose()
}

fn is_true(raw: Option<&str>) -> bool {
    raw == Some("true")
}
