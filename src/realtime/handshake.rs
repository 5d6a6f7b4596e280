//! Connection handshake: `connection_init`, wait for `connection_ack`.

use tracing::{debug, trace, warn};

use super::messages::{describe_payload, ClientFrame, ServerFrame};
use crate::error::TransportError;
use crate::traits::{RealtimeSocket, SocketEvent};

/// Send `connection_init` and wait for the acknowledgement.
///
/// Data frames that arrive before the acknowledgement are dropped. The caller
/// bounds this with the connection timeout.
pub async fn handshake(socket: &mut dyn RealtimeSocket) -> Result<(), TransportError> {
    socket
        .send_text(ClientFrame::connection_init().to_json()?)
        .await?;

    loop {
        match socket.next_event().await {
            SocketEvent::Text(text) => match ServerFrame::parse(&text) {
                Ok(ServerFrame::ConnectionAck { payload }) => {
                    debug!(?payload, "Connection acknowledged");
                    return Ok(());
                }
                Ok(ServerFrame::ConnectionError { payload }) => {
                    return Err(TransportError::ConnectionRejected(describe_payload(&payload)));
                }
                Ok(ServerFrame::Ka) => trace!("Keep-alive during handshake"),
                Ok(frame) => debug!(kind = frame.kind(), "Dropping frame received before acknowledgement"),
                Err(e) => warn!(error = %e, "Ignoring unparseable frame during handshake"),
            },
            SocketEvent::Alive => trace!("Transport ping during handshake"),
            SocketEvent::Closed { code, reason } => {
                return Err(TransportError::Closed { code, reason });
            }
            SocketEvent::Error(error) => return Err(error),
        }
    }
}
