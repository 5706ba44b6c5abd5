//! Single-request execution: one authenticated GET, timed and classified.

pub mod http;

use std::fmt;

use crate::token::CredentialKind;

pub use http::HttpExecutor;

/// Why a request failed. `Display` gives the tag used in the error breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorTag {
    /// A response arrived with a non-2xx status.
    Http(u16),
    /// No response: connection-level failure, by errno-style code.
    Transport(&'static str),
    /// The bearer token could not be obtained.
    Credential(CredentialKind),
    Unknown,
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorTag::Http(status) => write!(f, "HTTP {}", status),
            ErrorTag::Transport(code) => f.write_str(code),
            ErrorTag::Credential(kind) => write!(f, "{}", kind),
            ErrorTag::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { status: u16 },
    Failure { tag: ErrorTag },
}

/// The result of one request attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    /// Sequence id in `1..=total_requests`, assigned before dispatch.
    pub id: usize,
    /// Milliseconds from just before token acquisition to the response or failure.
    pub elapsed_ms: u64,
    pub outcome: Outcome,
}

impl RequestResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}

/// Runs one request attempt. Never fails: every error becomes a
/// [`Outcome::Failure`].
#[async_trait::async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, id: usize) -> RequestResult;
}
