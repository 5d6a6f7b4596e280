//! Mock realtime transport.
//!
//! Every opened socket gets a [`MockSocketHandle`] that plays the server side:
//! it injects events and inspects the frames the client sent. With
//! auto-handshake enabled (the default) the socket answers `connection_init`
//! with `connection_ack` and `start` with `start_ack` by itself.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use crate::error::TransportError;
use crate::traits::{RealtimeSocket, RealtimeTransport, SocketEvent};
use crate::util::lock;

#[derive(Default)]
struct TransportState {
    manual_handshake: AtomicBool,
    open_attempts: AtomicUsize,
    open_failures: Mutex<VecDeque<TransportError>>,
    scripted: Mutex<VecDeque<Vec<SocketEvent>>>,
    sockets: Mutex<Vec<MockSocketHandle>>,
    opened: Notify,
}

/// [`RealtimeTransport`] producing in-memory sockets.
#[derive(Clone, Default)]
pub struct MockRealtimeTransport {
    state: Arc<TransportState>,
}

impl MockRealtimeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable the automatic `connection_ack` / `start_ack` replies.
    pub fn set_manual_handshake(&self, manual: bool) {
        self.state.manual_handshake.store(manual, Ordering::SeqCst);
    }

    /// Make the next `open` call fail with `error`.
    pub fn fail_next_open(&self, error: TransportError) {
        lock(&self.state.open_failures).push_back(error);
    }

    /// Events delivered on the next opened socket before anything else.
    pub fn script_next_socket(&self, events: Vec<SocketEvent>) {
        lock(&self.state.scripted).push_back(events);
    }

    /// Number of `open` calls, failed ones included.
    pub fn open_attempts(&self) -> usize {
        self.state.open_attempts.load(Ordering::SeqCst)
    }

    pub fn sockets(&self) -> Vec<MockSocketHandle> {
        lock(&self.state.sockets).clone()
    }

    pub fn socket_count(&self) -> usize {
        lock(&self.state.sockets).len()
    }

    /// Wait until at least `n` sockets were opened and return the `n`th.
    pub async fn wait_for_socket(&self, n: usize) -> MockSocketHandle {
        loop {
            let notified = self.state.opened.notified();
            if let Some(handle) = lock(&self.state.sockets).get(n.saturating_sub(1)) {
                return handle.clone();
            }
            notified.await;
        }
    }
}

#[async_trait]
impl RealtimeTransport for MockRealtimeTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn RealtimeSocket>, TransportError> {
        self.state.open_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = lock(&self.state.open_failures).pop_front() {
            return Err(error);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Some(events) = lock(&self.state.scripted).pop_front() {
            for event in events {
                let _ = events_tx.send(event);
            }
        }

        let shared = Arc::new(SocketShared::default());
        let handle = MockSocketHandle {
            url: url.to_string(),
            events_tx: events_tx.clone(),
            shared: shared.clone(),
        };
        lock(&self.state.sockets).push(handle);
        self.state.opened.notify_waiters();

        Ok(Box::new(MockSocket {
            events_rx,
            events_tx,
            shared,
            auto_handshake: !self.state.manual_handshake.load(Ordering::SeqCst),
            finished: false,
        }))
    }
}

#[derive(Default)]
struct SocketShared {
    sent: Mutex<Vec<String>>,
    closed_by_client: AtomicBool,
    sent_notify: Notify,
}

/// Server side of a mock socket.
#[derive(Clone)]
pub struct MockSocketHandle {
    url: String,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    shared: Arc<SocketShared>,
}

impl MockSocketHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.events_tx.send(SocketEvent::Text(text.into()));
    }

    /// Transport-level ping from the server.
    pub fn push_ping(&self) {
        let _ = self.events_tx.send(SocketEvent::Alive);
    }

    pub fn push_frame(&self, frame: serde_json::Value) {
        self.push_text(frame.to_string());
    }

    pub fn push_close(&self, code: Option<u16>, reason: &str) {
        let _ = self.events_tx.send(SocketEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn push_error(&self, error: TransportError) {
        let _ = self.events_tx.send(SocketEvent::Error(error));
    }

    pub fn sent_frames(&self) -> Vec<String> {
        lock(&self.shared.sent).clone()
    }

    /// `type` field of every frame the client sent.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent_frames()
            .iter()
            .filter_map(|f| frame_type(f))
            .collect()
    }

    /// Frames of the given `type` the client sent, parsed.
    pub fn sent_of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.sent_frames()
            .iter()
            .filter_map(|f| serde_json::from_str::<serde_json::Value>(f).ok())
            .filter(|v| v.get("type").and_then(|t| t.as_str()) == Some(kind))
            .collect()
    }

    /// Wait until the client sent a frame of the given `type`.
    pub async fn wait_for_sent(&self, kind: &str) -> serde_json::Value {
        loop {
            let notified = self.shared.sent_notify.notified();
            if let Some(frame) = self.sent_of_type(kind).into_iter().next() {
                return frame;
            }
            notified.await;
        }
    }

    /// Whether the client closed this socket.
    pub fn is_closed(&self) -> bool {
        self.shared.closed_by_client.load(Ordering::SeqCst)
    }
}

struct MockSocket {
    events_rx: mpsc::UnboundedReceiver<SocketEvent>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    shared: Arc<SocketShared>,
    auto_handshake: bool,
    finished: bool,
}

fn frame_type(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("type")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl RealtimeSocket for MockSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.finished {
            return Err(TransportError::SendFailed("socket is closed".to_string()));
        }

        if self.auto_handshake {
            let parsed: Option<serde_json::Value> = serde_json::from_str(&text).ok();
            let kind = parsed
                .as_ref()
                .and_then(|v| v.get("type"))
                .and_then(|t| t.as_str());
            let reply = match kind {
                Some("connection_init") => Some(serde_json::json!({
                    "type": "connection_ack",
                    "payload": { "connectionTimeoutMs": 300000 }
                })),
                Some("start") => parsed
                    .as_ref()
                    .and_then(|v| v.get("id"))
                    .map(|id| serde_json::json!({ "type": "start_ack", "id": id })),
                _ => None,
            };
            if let Some(reply) = reply {
                let _ = self.events_tx.send(SocketEvent::Text(reply.to_string()));
            }
        }

        lock(&self.shared.sent).push(text);
        self.shared.sent_notify.notify_waiters();
        Ok(())
    }

    async fn next_event(&mut self) -> SocketEvent {
        if self.finished {
            return SocketEvent::Closed {
                code: None,
                reason: "socket already closed".to_string(),
            };
        }
        match self.events_rx.recv().await {
            Some(event) => {
                if matches!(event, SocketEvent::Closed { .. } | SocketEvent::Error(_)) {
                    self.finished = true;
                }
                event
            }
            None => {
                self.finished = true;
                SocketEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.shared.closed_by_client.store(true, Ordering::SeqCst);
        self.finished = true;
        Ok(())
    }
}
