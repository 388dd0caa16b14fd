//! Error taxonomy shared by every stage of the pipeline.
//!
//! | Variant | Raised by |
//! |---------|-----------|
//! | [`RagError::Config`] | missing credentials, missing source files, invalid settings, build in progress |
//! | [`RagError::Provider`] | embedding / generation API failures (network, timeout, rate limit, bad payload) |
//! | [`RagError::Validation`] | rejected user input (empty question) |
//! | [`RagError::Store`] | SQLite or filesystem failures inside the vector store |
//!
//! Start-up code treats `Config` as fatal; the HTTP layer turns the other
//! variants into structured per-request error responses.

use std::fmt;

use thiserror::Error;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// The request exceeded the configured timeout.
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// Any other non-success HTTP status.
    Status(u16),
    /// The response body could not be understood.
    Malformed,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Network => write!(f, "network"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::RateLimited => write!(f, "rate limited"),
            ProviderErrorKind::Status(code) => write!(f, "status {}", code),
            ProviderErrorKind::Malformed => write!(f, "malformed response"),
        }
    }
}

/// Errors produced by the campus RAG library.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider error ({provider}, {kind}): {message}")]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("vector store error: {0}")]
    Store(String),
}

impl RagError {
    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        RagError::Provider {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Provider { kind, .. } => match kind {
                ProviderErrorKind::Network
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::RateLimited => true,
                ProviderErrorKind::Status(code) => *code >= 500,
                ProviderErrorKind::Malformed => false,
            },
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RagError::Provider {
                kind: ProviderErrorKind::Timeout,
                ..
            }
        )
    }
}

impl From<sqlx::Error> for RagError {
    fn from(e: sqlx::Error) -> Self {
        RagError::Store(e.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        RagError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
