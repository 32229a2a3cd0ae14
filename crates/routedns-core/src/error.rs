//! Error types for the routedns system
//!
//! This module defines all error types used throughout the crate, plus the
//! coarse [`ErrorKind`] classification that retry and reconciliation decisions
//! are based on.

use thiserror::Error;

/// Result type alias for routedns operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the routedns system
#[derive(Error, Debug)]
pub enum Error {
    /// Reverse proxy provider errors
    #[error("Proxy provider error: {0}")]
    Proxy(String),

    /// DNS provider-related errors
    #[error("DNS provider error: {0}")]
    DnsProvider(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Connection refused, DNS failure, timeout: no HTTP response was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// An HTTP response with a non-success status
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or description
        message: String,
    },

    /// Upstream data that does not have the expected shape
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`]
///
/// Retry policies are expressed in terms of kinds rather than concrete variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeouts, refused connections, HTTP 429 and 5xx, local I/O hiccups
    Transient,
    /// Invalid JSON or wrong field types/shapes
    MalformedData,
    /// Invalid or missing settings
    Config,
    /// Everything else (4xx, authentication, not found, ...)
    Permanent,
}

impl Error {
    /// Create a proxy provider error
    pub fn proxy(msg: impl Into<String>) -> Self {
        Self::Proxy(msg.into())
    }

    /// Create a DNS provider error
    pub fn dns_provider(msg: impl Into<String>) -> Self {
        Self::DnsProvider(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an HTTP status error
    pub fn http(status: u16, msg: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: msg.into(),
        }
    }

    /// Create a malformed data error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) | Error::Io(_) => ErrorKind::Transient,
            Error::Http { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Transient
            }
            Error::Malformed(_) | Error::Json(_) => ErrorKind::MalformedData,
            Error::Config(_) | Error::Yaml(_) => ErrorKind::Config,
            _ => ErrorKind::Permanent,
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::Transient`
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
