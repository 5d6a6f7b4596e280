//! Realtime socket trait abstraction.

use async_trait::async_trait;

use crate::error::TransportError;

/// Something observed on an open socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// A text frame.
    Text(String),
    /// Transport-level traffic without a payload, such as a ping.
    Alive,
    /// The peer closed the socket, or the stream ended.
    Closed { code: Option<u16>, reason: String },
    /// A socket-level error; the socket is unusable afterwards.
    Error(TransportError),
}

/// One open bidirectional text-frame socket.
#[async_trait]
pub trait RealtimeSocket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next event. After `Closed` or `Error` every further call
    /// returns `Closed`.
    async fn next_event(&mut self) -> SocketEvent;

    /// Graceful close. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens realtime sockets.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a socket to the fully built `url` (credentials already encoded).
    async fn open(&self, url: &str) -> Result<Box<dyn RealtimeSocket>, TransportError>;
}
