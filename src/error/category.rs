//! Error category classification.
//!
//! Categories drive the retry and propagation decisions made by the request
//! client, the realtime manager and the session owner.

use std::fmt;

/// High-level categorization of errors for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Host unreachable, timeouts, dropped sockets. Retried locally.
    Network,

    /// Credential problems. Propagated to the session owner, never retried.
    Auth,

    /// Upstream 5xx / throttling. Retried locally after a delay.
    Server,

    /// Rejected requests (4xx other than 401/408/429) and malformed responses.
    Client,

    /// Errors embedded in an otherwise successful API response.
    Business,

    /// Credential persistence failures.
    Storage,

    /// Missing or invalid configuration.
    Configuration,
}

impl ErrorCategory {
    /// Returns true if errors in this category are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Server)
    }

    /// Short label used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Server => "server",
            ErrorCategory::Client => "client",
            ErrorCategory::Business => "business",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Configuration => "configuration",
        }
    }

    /// Suggested recovery action for an operator.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Check the hub's internet connection",
            ErrorCategory::Auth => "Sign in to the cloud account again",
            ErrorCategory::Server => "The cloud service is having trouble, try again later",
            ErrorCategory::Client => "The request was rejected by the cloud service",
            ErrorCategory::Business => "The cloud service refused the operation",
            ErrorCategory::Storage => "Check that the credential file location is writable",
            ErrorCategory::Configuration => "Check the hublink configuration",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
