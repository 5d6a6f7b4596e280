//! Realtime socket errors.

use std::time::Duration;

use thiserror::Error;

use super::auth::AuthError;

/// Socket-level failures of the realtime connection layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// Socket could not be opened.
    #[error("Failed to open realtime socket: {0}")]
    ConnectFailed(String),

    /// No `connection_ack` arrived within the connection timeout.
    #[error("No connection acknowledgement within {0:?}")]
    HandshakeTimeout(Duration),

    /// Server answered the handshake with `connection_error`.
    #[error("Realtime connection rejected: {0}")]
    ConnectionRejected(String),

    /// Peer closed the socket.
    #[error("Socket closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// Writing a frame failed.
    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    /// Frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Any other socket-level error.
    #[error("Socket error: {0}")]
    Socket(String),

    /// Credentials could not be obtained for the handshake.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The connection record was closed while the operation was pending.
    #[error("Connection for device '{0}' was closed")]
    Cancelled(String),
}

impl TransportError {
    /// Whether a reconnect attempt makes sense after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Auth(err) => !err.requires_reauth(),
            TransportError::Cancelled(_) => false,
            _ => true,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::ConnectFailed(_) => "E_RT_CONNECT",
            TransportError::HandshakeTimeout(_) => "E_RT_TIMEOUT",
            TransportError::ConnectionRejected(_) => "E_RT_REJECTED",
            TransportError::Closed { .. } => "E_RT_CLOSED",
            TransportError::SendFailed(_) => "E_RT_SEND",
            TransportError::Protocol(_) => "E_RT_PROTOCOL",
            TransportError::Socket(_) => "E_RT_SOCKET",
            TransportError::Auth(err) => err.error_code(),
            TransportError::Cancelled(_) => "E_RT_CANCELLED",
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}
