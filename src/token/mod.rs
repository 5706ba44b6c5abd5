//! Bearer token suppliers.
//!
//! A [`TokenSource`] returns an opaque bearer token scoped to a target
//! audience. Failures are [`TokenError`]s, which the request executor records
//! as credential failures without aborting the run.

pub mod service_account;

use std::collections::HashMap;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub use service_account::{ServiceAccountKey, ServiceAccountTokenSource};

/// Tokens are refreshed this many seconds before their `exp` claim.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed service account key: {0}")]
    MalformedKey(String),

    #[error("failed to sign token assertion")]
    Signing,

    #[error("token exchange request failed: {0}")]
    Exchange(#[source] reqwest::Error),

    #[error("token endpoint rejected the assertion ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint response did not contain an id_token")]
    MalformedResponse,
}

impl TokenError {
    pub fn kind(&self) -> CredentialKind {
        match self {
            TokenError::KeyFile { .. } => CredentialKind::KeyFile,
            TokenError::MalformedKey(_) => CredentialKind::MalformedKey,
            TokenError::Signing => CredentialKind::Signing,
            TokenError::Exchange(_) => CredentialKind::Exchange,
            TokenError::Rejected { .. } => CredentialKind::Rejected,
            TokenError::MalformedResponse => CredentialKind::MalformedResponse,
        }
    }
}

/// Coarse class of a credential failure, used as a report tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKind {
    KeyFile,
    MalformedKey,
    Signing,
    Exchange,
    Rejected,
    MalformedResponse,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            CredentialKind::KeyFile => "CREDENTIAL_KEY_FILE",
            CredentialKind::MalformedKey => "CREDENTIAL_MALFORMED_KEY",
            CredentialKind::Signing => "CREDENTIAL_SIGNING",
            CredentialKind::Exchange => "CREDENTIAL_EXCHANGE",
            CredentialKind::Rejected => "CREDENTIAL_REJECTED",
            CredentialKind::MalformedResponse => "CREDENTIAL_MALFORMED_RESPONSE",
        };
        f.write_str(tag)
    }
}

/// Supplies bearer tokens for an audience.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, audience: &str) -> Result<String, TokenError>;
}

/// A fixed, pre-minted token.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self, _audience: &str) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}

struct CachedToken {
    token: String,
    refresh_at: i64,
}

/// Reuses tokens from an inner source until shortly before they expire.
///
/// Only JWTs with a readable `exp` claim are cached. The lock is never held
/// across a fetch: callers that miss the cache fetch concurrently, and the
/// last successful fetch wins the slot.
pub struct CachedTokenSource<S> {
    inner: S,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl<S: TokenSource> CachedTokenSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl<S: TokenSource> TokenSource for CachedTokenSource<S> {
    async fn token(&self, audience: &str) -> Result<String, TokenError> {
        {
            let cache = self.cache.lock().await;
            let now = chrono::Utc::now().timestamp();
            if let Some(cached) = cache.get(audience) {
                if now < cached.refresh_at {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token = self.inner.token(audience).await?;
        let mut cache = self.cache.lock().await;
        match jwt_expiry(&token) {
            Some(exp) => {
                debug!(%audience, exp, "caching token");
                cache.insert(
                    audience.to_string(),
                    CachedToken {
                        token: token.clone(),
                        refresh_at: exp - REFRESH_MARGIN_SECS,
                    },
                );
            }
            None => {
                cache.remove(audience);
            }
        }
        Ok(token)
    }
}

/// Read the `exp` claim from a JWT without verifying it.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

#[cfg(test)]
pub(crate) fn fake_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}
