//! Realtime transport over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::traits::{RealtimeSocket, RealtimeTransport, SocketEvent};

/// Subprotocol spoken by the subscription endpoint.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// [`RealtimeTransport`] opening WebSocket connections.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    protocol: String,
}

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self {
            protocol: GRAPHQL_WS_PROTOCOL.to_string(),
        }
    }

    pub fn with_protocol(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeTransport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn RealtimeSocket>, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let protocol = HeaderValue::from_str(&self.protocol)
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", protocol);

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        debug!(status = %response.status(), "Realtime socket opened");

        Ok(Box::new(TungsteniteSocket {
            stream,
            finished: false,
        }))
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    finished: bool,
}

impl TungsteniteSocket {
    fn finish(&mut self, event: SocketEvent) -> SocketEvent {
        self.finished = true;
        event
    }
}

#[async_trait]
impl RealtimeSocket for TungsteniteSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.finished {
            return Err(TransportError::SendFailed("socket is closed".to_string()));
        }
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> SocketEvent {
        if self.finished {
            return SocketEvent::Closed {
                code: None,
                reason: "socket already closed".to_string(),
            };
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Text(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return SocketEvent::Text(text),
                    Err(_) => trace!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return self.finish(SocketEvent::Error(TransportError::Socket(
                            e.to_string(),
                        )));
                    }
                    return SocketEvent::Alive;
                }
                Some(Ok(Message::Pong(_))) => return SocketEvent::Alive,
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return self.finish(SocketEvent::Closed { code, reason });
                }
                Some(Err(e)) => {
                    return self.finish(SocketEvent::Error(TransportError::Socket(e.to_string())))
                }
                None => {
                    return self.finish(SocketEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    })
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }
}
