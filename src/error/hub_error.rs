//! Unified error type for hublink.

use std::fmt;

use super::auth::AuthError;
use super::category::ErrorCategory;
use super::context::ErrorContext;
use super::network::NetworkError;
use super::transport::TransportError;
use crate::request::GraphqlError;
use crate::traits::CredentialsError;

/// Every failure the crate surfaces to its callers.
#[derive(Debug)]
pub enum HubError {
    /// HTTP transport or status failure.
    Network(NetworkError),

    /// Login, refresh or credential validation failure.
    Auth(AuthError),

    /// Realtime socket failure.
    Transport(TransportError),

    /// Errors embedded in an otherwise successful API response.
    Graphql(Vec<GraphqlError>),

    /// Credential persistence failure.
    Storage(CredentialsError),

    /// Configuration could not be used.
    Configuration { message: String },

    /// Wrapped error with additional context.
    WithContext {
        error: Box<HubError>,
        context: ErrorContext,
    },
}

impl HubError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HubError::Network(err) => match err {
                NetworkError::HttpStatus { status, .. } if *status >= 500 || *status == 429 => {
                    ErrorCategory::Server
                }
                NetworkError::HttpStatus { status: 401, .. } => ErrorCategory::Auth,
                NetworkError::HttpStatus { .. } | NetworkError::InvalidResponse { .. } => {
                    ErrorCategory::Client
                }
                _ => ErrorCategory::Network,
            },
            HubError::Auth(_) => ErrorCategory::Auth,
            HubError::Transport(TransportError::Auth(_)) => ErrorCategory::Auth,
            HubError::Transport(_) => ErrorCategory::Network,
            HubError::Graphql(_) => ErrorCategory::Business,
            HubError::Storage(_) => ErrorCategory::Storage,
            HubError::Configuration { .. } => ErrorCategory::Configuration,
            HubError::WithContext { error, .. } => error.category(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            HubError::Network(err) => err.is_retryable(),
            HubError::Transport(err) => err.is_retryable(),
            HubError::WithContext { error, .. } => error.is_retryable(),
            _ => false,
        }
    }

    /// Authentication and token errors must reach the session owner, which
    /// tears down every credential-dependent resource.
    pub fn requires_reauth(&self) -> bool {
        match self {
            HubError::Auth(err) => err.requires_reauth(),
            HubError::Transport(TransportError::Auth(err)) => err.requires_reauth(),
            HubError::Network(NetworkError::HttpStatus { status: 401, .. }) => true,
            HubError::WithContext { error, .. } => error.requires_reauth(),
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            HubError::Network(err) => err.user_message(),
            HubError::Auth(err) => err.user_message(),
            HubError::Transport(_) => {
                "Lost the live connection to the cloud service. Reconnecting.".to_string()
            }
            HubError::Graphql(errors) => match errors.first() {
                Some(first) => format!("The cloud service refused the operation: {}", first.message),
                None => "The cloud service refused the operation.".to_string(),
            },
            HubError::Storage(err) => format!("Could not access stored credentials: {}", err),
            HubError::Configuration { message } => format!("Configuration error: {}", message),
            HubError::WithContext { error, .. } => error.user_message(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            HubError::Network(err) => err.error_code(),
            HubError::Auth(err) => err.error_code(),
            HubError::Transport(err) => err.error_code(),
            HubError::Graphql(_) => "E_API_GRAPHQL",
            HubError::Storage(_) => "E_STORAGE",
            HubError::Configuration { .. } => "E_CONFIG",
            HubError::WithContext { error, .. } => error.error_code(),
        }
    }

    pub fn with_context(self, ctx: ErrorContext) -> Self {
        HubError::WithContext {
            error: Box::new(self),
            context: ctx,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            HubError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The innermost error, with every context layer stripped.
    pub fn inner(&self) -> &HubError {
        match self {
            HubError::WithContext { error, .. } => error.inner(),
            _ => self,
        }
    }

    /// HTTP status of the underlying failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self.inner() {
            HubError::Network(err) => err.status(),
            HubError::Auth(AuthError::ApiError { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn recovery_hint(&self) -> &'static str {
        self.category().recovery_hint()
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Network(err) => write!(f, "{}", err),
            HubError::Auth(err) => write!(f, "{}", err),
            HubError::Transport(err) => write!(f, "{}", err),
            HubError::Graphql(errors) => {
                let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
                write!(f, "API returned errors: {}", messages.join("; "))
            }
            HubError::Storage(err) => write!(f, "{}", err),
            HubError::Configuration { message } => write!(f, "Configuration error: {}", message),
            HubError::WithContext { error, context } => write!(f, "{} ({})", error, context),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::Network(err) => Some(err),
            HubError::Auth(err) => Some(err),
            HubError::Transport(err) => Some(err),
            HubError::Storage(err) => Some(err),
            HubError::Graphql(_) | HubError::Configuration { .. } => None,
            HubError::WithContext { error, .. } => error.source(),
        }
    }
}

// ============================================================================
// From implementations
// ============================================================================

impl From<NetworkError> for HubError {
    fn from(err: NetworkError) -> Self {
        HubError::Network(err)
    }
}

impl From<AuthError> for HubError {
    fn from(err: AuthError) -> Self {
        HubError::Auth(err)
    }
}

impl From<TransportError> for HubError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Auth(auth) => HubError::Auth(auth),
            other => HubError::Transport(other),
        }
    }
}

impl From<CredentialsError> for HubError {
    fn from(err: CredentialsError) -> Self {
        HubError::Storage(err)
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Network(NetworkError::InvalidResponse {
            message: err.to_string(),
        })
    }
}
