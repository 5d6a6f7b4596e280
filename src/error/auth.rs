//! Authentication and credential lifecycle errors.

use std::fmt;

/// Errors raised by login, refresh and credential validation.
///
/// `Clone` is required: a single refresh outcome is shared by every caller
/// that awaited the same in-flight refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Identifier/secret pair was rejected. Fatal; the user must re-enter them.
    AuthenticationFailed { message: String },

    /// The identity service asked for an interactive step this flow cannot
    /// perform (new secret, multi-factor code).
    ChallengeRequired { challenge: String },

    /// No session exists.
    NotAuthenticated,

    /// A refresh was needed but the session carries no refresh token.
    RefreshTokenMissing,

    /// The identity service rejected the refresh token.
    RefreshTokenInvalid { message: String },

    /// The refresh call failed for another reason (transport, bad payload).
    RefreshFailed { message: String },

    /// A credential triple was partial or malformed.
    InvalidCredentials { message: String },

    /// Identity service returned an unexpected status.
    ApiError { status: u16, message: String },
}

impl AuthError {
    /// Refresh failures: all of these invalidate the session.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshTokenMissing
                | AuthError::RefreshTokenInvalid { .. }
                | AuthError::RefreshFailed { .. }
        )
    }

    /// Whether the only way forward is a fresh login.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            AuthError::AuthenticationFailed { .. }
                | AuthError::NotAuthenticated
                | AuthError::RefreshTokenMissing
                | AuthError::RefreshTokenInvalid { .. }
                | AuthError::RefreshFailed { .. }
                | AuthError::InvalidCredentials { .. }
                | AuthError::ApiError { status: 401, .. }
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            AuthError::AuthenticationFailed { .. } => {
                "The cloud account rejected those credentials. Please check them and sign in again."
                    .to_string()
            }
            AuthError::ChallengeRequired { challenge } => format!(
                "The cloud account requires an additional step ({}). Complete it in the vendor app, then sign in again.",
                challenge
            ),
            AuthError::NotAuthenticated => "Not signed in to the cloud account.".to_string(),
            AuthError::RefreshTokenMissing
            | AuthError::RefreshTokenInvalid { .. }
            | AuthError::RefreshFailed { .. } => {
                "The cloud session could not be renewed. Please sign in again.".to_string()
            }
            AuthError::InvalidCredentials { .. } => {
                "Stored cloud credentials are invalid. Please sign in again.".to_string()
            }
            AuthError::ApiError { status, message } => match *status {
                401 => "The cloud session has expired. Please sign in again.".to_string(),
                _ => format!("Cloud sign-in failed: {}", message),
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::AuthenticationFailed { .. } => "E_AUTH_FAILED",
            AuthError::ChallengeRequired { .. } => "E_AUTH_CHALLENGE",
            AuthError::NotAuthenticated => "E_AUTH_NOT_AUTH",
            AuthError::RefreshTokenMissing => "E_AUTH_REFRESH_MISSING",
            AuthError::RefreshTokenInvalid { .. } => "E_AUTH_REFRESH_INV",
            AuthError::RefreshFailed { .. } => "E_AUTH_REFRESH_FAIL",
            AuthError::InvalidCredentials { .. } => "E_AUTH_INVALID",
            AuthError::ApiError { .. } => "E_AUTH_API",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            AuthError::ChallengeRequired { challenge } => {
                write!(f, "Unsupported authentication challenge: {}", challenge)
            }
            AuthError::NotAuthenticated => write!(f, "Not authenticated"),
            AuthError::RefreshTokenMissing => write!(f, "No refresh token available"),
            AuthError::RefreshTokenInvalid { message } => {
                write!(f, "Refresh token rejected: {}", message)
            }
            AuthError::RefreshFailed { message } => {
                write!(f, "Token refresh failed: {}", message)
            }
            AuthError::InvalidCredentials { message } => {
                write!(f, "Invalid credentials: {}", message)
            }
            AuthError::ApiError { status, message } => {
                write!(f, "Identity API error ({}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for AuthError {}
