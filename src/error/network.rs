//! HTTP-side network errors.
//!
//! `HttpStatus` is the surfaced `ApiError{statusCode}`: a non-2xx response
//! that was not recovered by retries or by a forced refresh.

use std::fmt;

use crate::traits::HttpError;

/// Network-specific error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// Could not reach the host.
    ConnectionFailed { url: String, message: String },

    /// Request timed out.
    Timeout { operation: String, message: String },

    /// Non-2xx response.
    HttpStatus { status: u16, message: String },

    /// 2xx response whose body could not be parsed.
    InvalidResponse { message: String },

    /// Request was cancelled before completing.
    Cancelled,

    /// Anything else reported by the HTTP stack.
    Other { message: String },
}

impl NetworkError {
    /// Whether the request client may retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::ConnectionFailed { .. } => true,
            NetworkError::Timeout { .. } => true,
            NetworkError::HttpStatus { status, .. } => is_retryable_status(*status),
            NetworkError::InvalidResponse { .. } => false,
            NetworkError::Cancelled => false,
            // Unclassified transport failures (reset connections, broken bodies)
            NetworkError::Other { .. } => true,
        }
    }

    /// HTTP status, if the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            NetworkError::ConnectionFailed { .. } => {
                "Unable to reach the cloud service. Please check the hub's internet connection."
                    .to_string()
            }
            NetworkError::Timeout { operation, .. } => {
                format!("The {} request to the cloud service timed out.", operation)
            }
            NetworkError::HttpStatus { status, .. } => match *status {
                400 => "The cloud service rejected the request.".to_string(),
                401 => "The cloud session is no longer accepted. Please sign in again.".to_string(),
                403 => "The cloud account is not allowed to perform this action.".to_string(),
                404 => "The requested cloud resource was not found.".to_string(),
                429 => "Too many requests to the cloud service. Please wait a moment.".to_string(),
                500..=599 => "The cloud service is experiencing issues.".to_string(),
                _ => format!("The cloud service returned HTTP {}.", status),
            },
            NetworkError::InvalidResponse { .. } => {
                "Received an unreadable response from the cloud service.".to_string()
            }
            NetworkError::Cancelled => "The request was cancelled.".to_string(),
            NetworkError::Other { message } => format!("Network error: {}", message),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed { .. } => "E_NET_CONN",
            NetworkError::Timeout { .. } => "E_NET_TIMEOUT",
            NetworkError::HttpStatus { .. } => "E_NET_HTTP",
            NetworkError::InvalidResponse { .. } => "E_NET_INVALID",
            NetworkError::Cancelled => "E_NET_CANCEL",
            NetworkError::Other { .. } => "E_NET_OTHER",
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::ConnectionFailed { url, message } => {
                write!(f, "Connection failed to '{}': {}", url, message)
            }
            NetworkError::Timeout { operation, message } => {
                write!(f, "{} timed out: {}", operation, message)
            }
            NetworkError::HttpStatus { status, message } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            NetworkError::InvalidResponse { message } => {
                write!(f, "Invalid response: {}", message)
            }
            NetworkError::Cancelled => write!(f, "Request cancelled"),
            NetworkError::Other { message } => write!(f, "Network error: {}", message),
        }
    }
}

impl std::error::Error for NetworkError {}

/// 5xx, request timeout and throttling are worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Classify an adapter-level [`HttpError`] for the request at `url`.
pub fn classify_http_error(err: &HttpError, url: &str) -> NetworkError {
    match err {
        HttpError::ConnectionFailed(message) => NetworkError::ConnectionFailed {
            url: url.to_string(),
            message: message.clone(),
        },
        HttpError::Timeout(message) => NetworkError::Timeout {
            operation: "HTTP request".to_string(),
            message: message.clone(),
        },
        HttpError::ServerError { status, message } => NetworkError::HttpStatus {
            status: *status,
            message: message.clone(),
        },
        HttpError::Cancelled => NetworkError::Cancelled,
        HttpError::InvalidUrl(message) => NetworkError::ConnectionFailed {
            url: url.to_string(),
            message: format!("invalid URL: {}", message),
        },
        HttpError::Io(message) | HttpError::Other(message) => NetworkError::Other {
            message: message.clone(),
        },
    }
}
