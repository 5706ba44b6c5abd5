use super::{ErrorTag, Outcome, RequestExecutor, RequestResult};
use crate::config::{AuthMethod, RunConfig};
use crate::token::TokenSource;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use reqwest::Client;
use std::error::Error as _;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Sent under `Authorization` in `both` mode. Well-formed, never valid.
pub const PLACEHOLDER_BEARER: &str = "Bearer invalid-token-to-demonstrate-precedence";

/// Build the auth headers for `method`.
///
/// In `both` mode the real token always goes under `secondary`; the
/// placeholder goes under `Authorization`.
pub fn build_headers(
    method: AuthMethod,
    secondary: &HeaderName,
    token: &str,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token))?;
    bearer.set_sensitive(true);

    let mut headers = HeaderMap::new();
    match method {
        AuthMethod::Auth => {
            headers.insert(AUTHORIZATION, bearer);
        }
        AuthMethod::XAuth => {
            headers.insert(secondary.clone(), bearer);
        }
        AuthMethod::Both => {
            headers.insert(AUTHORIZATION, HeaderValue::from_static(PLACEHOLDER_BEARER));
            headers.insert(secondary.clone(), bearer);
        }
    }
    Ok(headers)
}

/// Map a transport failure to an errno-style code.
///
/// The first `io::Error` in the source chain decides when its kind is
/// recognised; otherwise reqwest's own classification is used.
pub fn classify_transport(err: &reqwest::Error) -> Option<&'static str> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            if let Some(code) = io_code(io_err.kind()) {
                return Some(code);
            }
        }
        source = inner.source();
    }

    if err.is_timeout() {
        Some("ETIMEDOUT")
    } else if err.is_connect() {
        Some("ECONNECT")
    } else if err.is_redirect() {
        Some("EREDIRECT")
    } else if err.is_body() || err.is_decode() {
        Some("EBODY")
    } else if err.is_request() {
        Some("EREQUEST")
    } else {
        None
    }
}

fn io_code(kind: io::ErrorKind) -> Option<&'static str> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
        io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
        io::ErrorKind::NotConnected => Some("ENOTCONN"),
        io::ErrorKind::AddrNotAvailable => Some("EADDRNOTAVAIL"),
        io::ErrorKind::BrokenPipe => Some("EPIPE"),
        io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
        _ => None,
    }
}

/// Issues the configured GET with a freshly acquired bearer token.
pub struct HttpExecutor {
    client: Client,
    tokens: Arc<dyn TokenSource>,
    target_url: String,
    audience: String,
    auth_method: AuthMethod,
    secondary_header: HeaderName,
    detailed: bool,
}

impl HttpExecutor {
    pub fn new(config: &RunConfig, client: Client, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let secondary_header = HeaderName::from_bytes(config.secondary_header.as_bytes())
            .with_context(|| format!("invalid header name: {}", config.secondary_header))?;

        Ok(Self {
            client,
            tokens,
            target_url: config.target_url.clone(),
            audience: config.target_audience.clone(),
            auth_method: config.auth_method,
            secondary_header,
            detailed: config.output.detailed,
        })
    }

    async fn attempt(&self, id: usize) -> Outcome {
        let token = match self.tokens.token(&self.audience).await {
            Ok(token) => token,
            Err(e) => {
                if self.detailed {
                    warn!(id, error = %e, "token acquisition failed");
                }
                return Outcome::Failure {
                    tag: ErrorTag::Credential(e.kind()),
                };
            }
        };
        if self.detailed {
            info!(id, token_len = token.len(), "obtained ID token");
        }

        let headers = match build_headers(self.auth_method, &self.secondary_header, &token) {
            Ok(headers) => headers,
            Err(e) => {
                if self.detailed {
                    warn!(id, error = %e, "token is not a valid header value");
                }
                return Outcome::Failure {
                    tag: ErrorTag::Unknown,
                };
            }
        };
        if self.detailed {
            let sent: Vec<&str> = headers.keys().map(|k| k.as_str()).collect();
            info!(id, headers = ?sent, "sending request");
        }

        let response = match self.client.get(&self.target_url).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => return self.failure_from(id, &e),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return self.failure_from(id, &e),
        };
        if self.detailed {
            info!(
                id,
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "response received"
            );
        }

        if status.is_success() {
            Outcome::Success {
                status: status.as_u16(),
            }
        } else {
            Outcome::Failure {
                tag: ErrorTag::Http(status.as_u16()),
            }
        }
    }

    fn failure_from(&self, id: usize, err: &reqwest::Error) -> Outcome {
        if self.detailed {
            warn!(id, error = %err, "request failed");
        }
        let tag = match err.status() {
            Some(status) => ErrorTag::Http(status.as_u16()),
            None => classify_transport(err)
                .map(ErrorTag::Transport)
                .unwrap_or(ErrorTag::Unknown),
        };
        Outcome::Failure { tag }
    }
}

#[async_trait::async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, id: usize) -> RequestResult {
        let start = Instant::now();
        if self.detailed {
            info!(id, url = %self.target_url, audience = %self.audience, "requesting");
            info!(id, auth_method = %self.auth_method, "using auth method");
        }

        let outcome = self.attempt(id).await;

        RequestResult {
            id,
            elapsed_ms: start.elapsed().as_millis() as u64,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliArgs, Defaults, EnvOverrides};
    use crate::token::{CredentialKind, StaticTokenSource, TokenError};
    use clap::Parser;

    struct FailingTokenSource;

    #[async_trait::async_trait]
    impl TokenSource for FailingTokenSource {
        async fn token(&self, _audience: &str) -> Result<String, TokenError> {
            Err(TokenError::MalformedResponse)
        }
    }

    fn secondary() -> HeaderName {
        HeaderName::from_static("x-custom-authorization")
    }

    /// A local port with nothing listening on it.
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config_for(port: u16, method: &str) -> RunConfig {
        let audience = format!("http://127.0.0.1:{}", port);
        let cli = CliArgs::try_parse_from([
            "authload",
            "--target-audience",
            audience.as_str(),
            "--auth-method",
            method,
        ])
        .unwrap();
        RunConfig::resolve(&Defaults::default(), &EnvOverrides::default(), &cli).unwrap()
    }

    #[test]
    fn test_auth_mode_sets_authorization_only() {
        let headers = build_headers(AuthMethod::Auth, &secondary(), "tok").unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
    }

    #[test]
    fn test_x_auth_mode_sets_secondary_only() {
        let headers = build_headers(AuthMethod::XAuth, &secondary(), "tok").unwrap();
        assert_eq!(headers.len(), 1);
        assert!(headers.get(AUTHORIZATION).is_none());
        assert_eq!(headers["x-custom-authorization"], "Bearer tok");
    }

    #[test]
    fn test_both_mode_puts_real_token_under_secondary() {
        let headers = build_headers(AuthMethod::Both, &secondary(), "real").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-custom-authorization"], "Bearer real");
        assert_eq!(headers[AUTHORIZATION], PLACEHOLDER_BEARER);
        assert!(PLACEHOLDER_BEARER.starts_with("Bearer "));
        assert!(!headers[AUTHORIZATION].to_str().unwrap().contains("real"));
    }

    #[test]
    fn test_token_with_newline_rejected() {
        assert!(build_headers(AuthMethod::Auth, &secondary(), "a\nb").is_err());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let port = closed_port();
        let executor = HttpExecutor::new(
            &config_for(port, "auth"),
            Client::new(),
            Arc::new(StaticTokenSource::new("tok")),
        )
        .unwrap();

        let result = executor.execute(7).await;
        assert_eq!(result.id, 7);
        assert_eq!(
            result.outcome,
            Outcome::Failure {
                tag: ErrorTag::Transport("ECONNREFUSED")
            }
        );
    }

    #[tokio::test]
    async fn test_token_failure_is_credential_failure() {
        let executor = HttpExecutor::new(
            &config_for(closed_port(), "both"),
            Client::new(),
            Arc::new(FailingTokenSource),
        )
        .unwrap();

        let result = executor.execute(1).await;
        assert_eq!(
            result.outcome,
            Outcome::Failure {
                tag: ErrorTag::Credential(CredentialKind::MalformedResponse)
            }
        );
    }
}
