//! Per-device realtime subscriptions.
//!
//! Every device id owns one [`ConnectionRecord`]. A record moves through
//! `connecting -> handshaking -> subscribed`, and back to `disconnected` with a
//! single scheduled reconnect when its socket is lost. Data is forwarded only
//! while the record is active and only for the subscription id it started.
//!
//! Tasks spawned for a record (connect attempt, socket reader, reconnect
//! timer) hold a weak reference to the manager and the record's epoch, so a
//! task that outlives its record never touches a newer one.

use chrono::{DateTime, Utc};
use futures::future::{join_all, FutureExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::backoff::Backoff;
use super::connection::{
    Command, ConnectOptions, ConnectionRecord, Lifecycle, PendingConnect, SubscriptionState,
};
use super::handshake::handshake;
use super::messages::{describe_payload, ClientFrame, ServerFrame, StartPayload};
use super::url::{api_host, build_realtime_url};
use crate::auth::AuthSessionManager;
use crate::config::{HubConfig, RealtimeConfig};
use crate::error::TransportError;
use crate::models::{DataUpdate, UpdateSource};
use crate::traits::{RealtimeSocket, RealtimeTransport, SocketEvent};
use crate::util::lock;

/// How long a graceful close may take before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Owns the realtime subscription of every connected device.
#[derive(Clone)]
pub struct RealtimeConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transport: Arc<dyn RealtimeTransport>,
    session: AuthSessionManager,
    config: RealtimeConfig,
    backoff: Backoff,
    realtime_url: String,
    api_host: String,
    subscription_query: String,
    records: Mutex<HashMap<String, ConnectionRecord>>,
    updates: broadcast::Sender<DataUpdate>,
    next_epoch: AtomicU64,
}

struct LiveSocket {
    socket: Box<dyn RealtimeSocket>,
    subscription_id: String,
}

enum Step {
    Event(SocketEvent),
    Heartbeat,
    Command(Option<Command>),
}

impl RealtimeConnectionManager {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        session: AuthSessionManager,
        config: &HubConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                session,
                backoff: Backoff::from_config(&config.realtime),
                config: config.realtime.clone(),
                realtime_url: config.realtime_url.clone(),
                api_host: api_host(&config.api_url),
                subscription_query: config.subscription_query.clone(),
                records: Mutex::new(HashMap::new()),
                updates,
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Open and subscribe the device's socket.
    ///
    /// Resolves once the server acknowledged the connection and the
    /// subscription was started. Calling it for a device that is already
    /// connected, or while a connect is in flight, joins the existing
    /// connection instead of opening another socket. `options` only apply
    /// when a new record is created.
    pub async fn connect(
        &self,
        device_id: &str,
        options: ConnectOptions,
    ) -> Result<watch::Receiver<SubscriptionState>, TransportError> {
        let (pending, state) = {
            let mut records = lock(&self.inner.records);
            match records.get_mut(device_id) {
                Some(record) if record.lifecycle == Lifecycle::Active => {
                    let state = record.state.subscribe();
                    if record.socket_task.is_some() {
                        debug!(device_id, "Realtime connection already live");
                        return Ok(state);
                    }
                    match record.pending_connect.clone() {
                        Some(pending) => (pending, state),
                        None => {
                            // Waiting out a reconnect delay; connect now instead.
                            record.cancel_reconnect_timer();
                            (self.inner.start_attempt(record, false), state)
                        }
                    }
                }
                _ => {
                    let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst);
                    let mut record = ConnectionRecord::new(device_id, epoch, options);
                    let state = record.state.subscribe();
                    let pending = self.inner.start_attempt(&mut record, true);
                    records.insert(device_id.to_string(), record);
                    (pending, state)
                }
            }
        };

        pending.await?;
        Ok(state)
    }

    /// Stop and close the device's subscription. Cancels any pending
    /// reconnect and connect attempt. Idempotent.
    pub async fn close(&self, device_id: &str) {
        let (epoch, socket_task, commands) = {
            let mut records = lock(&self.inner.records);
            let Some(record) = records.get_mut(device_id) else {
                return;
            };
            if record.lifecycle != Lifecycle::Active {
                return;
            }
            record.lifecycle = Lifecycle::ManuallyClosing;
            record.cancel_reconnect_timer();
            if let Some(attempt) = record.attempt_task.take() {
                attempt.abort();
            }
            record.pending_connect = None;
            record.set_state(SubscriptionState::Disconnected);
            (record.epoch, record.socket_task.take(), record.commands.take())
        };

        info!(device_id, "Closing realtime connection");
        if let Some(commands) = commands {
            let _ = commands.send(Command::Close);
        }
        if let Some(mut task) = socket_task {
            if timeout(CLOSE_GRACE * 2, &mut task).await.is_err() {
                warn!(device_id, "Socket task did not stop in time, aborting");
                task.abort();
            }
        }

        let mut records = lock(&self.inner.records);
        if records.get(device_id).map(|r| r.epoch == epoch).unwrap_or(false) {
            records.remove(device_id);
        }
    }

    /// Close every connection. Idempotent.
    pub async fn close_all(&self) {
        let device_ids = self.device_ids();
        if device_ids.is_empty() {
            return;
        }
        info!(count = device_ids.len(), "Closing all realtime connections");
        join_all(device_ids.iter().map(|id| self.close(id))).await;
    }

    pub fn state(&self, device_id: &str) -> SubscriptionState {
        lock(&self.inner.records)
            .get(device_id)
            .map(|r| *r.state.borrow())
            .unwrap_or(SubscriptionState::Disconnected)
    }

    /// State stream of the device's current record.
    pub fn watch_state(&self, device_id: &str) -> Option<watch::Receiver<SubscriptionState>> {
        lock(&self.inner.records)
            .get(device_id)
            .map(|r| r.state.subscribe())
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.state(device_id).is_live()
    }

    /// Reconnects attempted since the last successful handshake.
    pub fn reconnect_attempts(&self, device_id: &str) -> u32 {
        lock(&self.inner.records)
            .get(device_id)
            .map(|r| r.reconnect_attempts)
            .unwrap_or(0)
    }

    pub fn last_message_at(&self, device_id: &str) -> Option<DateTime<Utc>> {
        lock(&self.inner.records)
            .get(device_id)
            .and_then(|r| r.last_message_at)
    }

    /// Devices with an active record, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.records)
            .values()
            .filter(|r| r.lifecycle == Lifecycle::Active)
            .map(|r| r.device_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every update delivered over any subscription.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<DataUpdate> {
        self.inner.updates.subscribe()
    }
}

impl ManagerInner {
    /// Spawn one connect attempt for `record` and remember it as pending.
    fn start_attempt(self: &Arc<Self>, record: &mut ConnectionRecord, initial: bool) -> PendingConnect {
        let device_id = record.device_id.clone();
        let epoch = record.epoch;
        let options = record.options.clone();
        record.set_state(SubscriptionState::Connecting);

        let task = tokio::spawn(run_attempt(
            Arc::downgrade(self),
            device_id.clone(),
            epoch,
            options,
            initial,
        ));
        record.attempt_task = Some(task.abort_handle());

        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Cancelled(device_id)),
            }
        }
        .boxed()
        .shared();
        record.pending_connect = Some(pending.clone());
        pending
    }

    async fn establish(
        &self,
        device_id: &str,
        epoch: u64,
        options: &ConnectOptions,
    ) -> Result<LiveSocket, TransportError> {
        let auth = self.session.get_headers().await?;
        let url = build_realtime_url(&self.realtime_url, &self.api_host, &auth);
        let connect_timeout = self.config.connect_timeout;
        let deadline = Instant::now() + connect_timeout;

        debug!(device_id, "Opening realtime socket");
        let mut socket = match timeout_at(deadline, self.transport.open(&url)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::HandshakeTimeout(connect_timeout)),
        };

        self.set_state(device_id, epoch, SubscriptionState::Handshaking);
        match timeout_at(deadline, handshake(socket.as_mut())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = socket.close().await;
                return Err(e);
            }
            Err(_) => {
                warn!(device_id, timeout_secs = connect_timeout.as_secs(), "No connection acknowledgement");
                let _ = socket.close().await;
                return Err(TransportError::HandshakeTimeout(connect_timeout));
            }
        }

        let subscription_id = Uuid::new_v4().to_string();
        let query = options
            .query
            .as_deref()
            .unwrap_or(&self.subscription_query);
        let variables = subscription_variables(
            &self.config.device_id_variable,
            device_id,
            options.variables.as_ref(),
        );
        let start = ClientFrame::Start {
            id: subscription_id.clone(),
            payload: StartPayload::new(query, &variables, &self.api_host, &auth.id_token)?,
        };
        if let Err(e) = socket.send_text(start.to_json()?).await {
            let _ = socket.close().await;
            return Err(e);
        }

        Ok(LiveSocket {
            socket,
            subscription_id,
        })
    }

    /// Make `live` the record's socket. Hands the socket back if the record
    /// was closed or replaced in the meantime.
    fn register_live(
        self: &Arc<Self>,
        device_id: &str,
        epoch: u64,
        live: LiveSocket,
    ) -> Result<(), LiveSocket> {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(device_id).filter(|r| r.is_active(epoch)) else {
            return Err(live);
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        record.reconnect_attempts = 0;
        record.last_message_at = Some(Utc::now());
        record.subscription_id = Some(live.subscription_id.clone());
        record.pending_connect = None;
        record.attempt_task = None;
        record.commands = Some(commands_tx);
        record.socket_task = Some(tokio::spawn(run_socket(
            Arc::downgrade(self),
            device_id.to_string(),
            epoch,
            live,
            commands_rx,
            self.config.clone(),
        )));
        record.set_state(SubscriptionState::Subscribed);
        info!(device_id, "Realtime subscription established");
        Ok(())
    }

    fn attempt_failed(self: &Arc<Self>, device_id: &str, epoch: u64, error: &TransportError, initial: bool) {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(device_id).filter(|r| r.is_active(epoch)) else {
            return;
        };
        record.pending_connect = None;
        record.attempt_task = None;

        if initial || !error.is_retryable() {
            if initial {
                warn!(device_id, error = %error, "Realtime connect failed");
            } else {
                error!(device_id, error = %error, "Realtime reconnect failed permanently, giving up");
            }
            record.set_state(SubscriptionState::Disconnected);
            records.remove(device_id);
            return;
        }

        warn!(device_id, error = %error, "Realtime reconnect failed");
        self.schedule_reconnect(record);
    }

    /// The live socket of the record ended without a manual close.
    fn connection_lost(self: &Arc<Self>, device_id: &str, epoch: u64, error: TransportError) {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(device_id).filter(|r| r.is_active(epoch)) else {
            return;
        };
        record.socket_task = None;
        record.commands = None;
        record.subscription_id = None;

        if !error.is_retryable() {
            error!(device_id, error = %error, "Realtime connection lost, not reconnecting");
            record.set_state(SubscriptionState::Disconnected);
            records.remove(device_id);
            return;
        }

        warn!(device_id, error = %error, "Realtime connection lost");
        self.schedule_reconnect(record);
    }

    /// Replace any pending reconnect with one after the next backoff delay.
    fn schedule_reconnect(self: &Arc<Self>, record: &mut ConnectionRecord) {
        record.cancel_reconnect_timer();

        let attempt = record.reconnect_attempts;
        let delay = self.backoff.delay(attempt);
        record.reconnect_attempts += 1;
        record.timer_seq += 1;
        record.set_state(SubscriptionState::Disconnected);

        info!(
            device_id = %record.device_id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduling realtime reconnect"
        );

        let weak = Arc::downgrade(self);
        let device_id = record.device_id.clone();
        let epoch = record.epoch;
        let seq = record.timer_seq;
        record.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_reconnect(&device_id, epoch, seq);
            }
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, device_id: &str, epoch: u64, seq: u64) {
        let mut records = lock(&self.records);
        let Some(record) = records
            .get_mut(device_id)
            .filter(|r| r.is_active(epoch) && r.timer_seq == seq)
        else {
            return;
        };
        record.reconnect_timer = None;
        if record.socket_task.is_some() || record.pending_connect.is_some() {
            return;
        }
        debug!(device_id, attempt = record.reconnect_attempts, "Reconnecting");
        let _ = self.start_attempt(record, false);
    }

    fn set_state(&self, device_id: &str, epoch: u64, state: SubscriptionState) {
        if let Some(record) = lock(&self.records)
            .get(device_id)
            .filter(|r| r.is_active(epoch))
        {
            record.set_state(state);
        }
    }

    /// Handle one frame of a live socket. Returns an error when the frame
    /// ends the connection.
    fn handle_frame(
        &self,
        device_id: &str,
        epoch: u64,
        subscription_id: &str,
        text: &str,
    ) -> Option<TransportError> {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device_id, error = %e, "Ignoring unparseable frame");
                return None;
            }
        };

        match frame {
            ServerFrame::Data { id, payload } if id == subscription_id => {
                self.deliver(device_id, epoch, payload);
            }
            ServerFrame::Data { id, .. } => {
                debug!(device_id, subscription = %id, "Dropping data for unknown subscription");
                self.touch(device_id, epoch);
            }
            ServerFrame::Ka => {
                trace!(device_id, "Keep-alive");
                self.touch(device_id, epoch);
            }
            ServerFrame::StartAck { id } => {
                debug!(device_id, subscription = %id, "Subscription started");
                self.touch(device_id, epoch);
            }
            ServerFrame::Error { id, payload } => {
                warn!(
                    device_id,
                    subscription = ?id,
                    error = %describe_payload(&payload),
                    "Subscription error"
                );
                self.touch(device_id, epoch);
                self.set_state(device_id, epoch, SubscriptionState::Degraded);
            }
            ServerFrame::ConnectionError { payload } => {
                return Some(TransportError::ConnectionRejected(describe_payload(&payload)));
            }
            ServerFrame::Complete { id } if id == subscription_id => {
                return Some(TransportError::Closed {
                    code: None,
                    reason: "subscription completed by server".to_string(),
                });
            }
            other => {
                debug!(device_id, kind = other.kind(), "Ignoring frame");
                self.touch(device_id, epoch);
            }
        }
        None
    }

    fn touch(&self, device_id: &str, epoch: u64) {
        if let Some(record) = lock(&self.records)
            .get_mut(device_id)
            .filter(|r| r.is_active(epoch))
        {
            record.last_message_at = Some(Utc::now());
        }
    }

    fn deliver(&self, device_id: &str, epoch: u64, payload: Value) {
        let callback = {
            let mut records = lock(&self.records);
            let Some(record) = records.get_mut(device_id).filter(|r| r.is_active(epoch)) else {
                debug!(device_id, "Dropping data for closing connection");
                return;
            };
            record.last_message_at = Some(Utc::now());
            if *record.state.borrow() == SubscriptionState::Degraded {
                record.set_state(SubscriptionState::Subscribed);
            }
            record.options.on_update.clone()
        };

        let update = DataUpdate::new(device_id, payload, UpdateSource::Realtime);
        if let Some(callback) = callback {
            callback(update.clone());
        }
        let _ = self.updates.send(update);
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for record in lock(&self.records).values_mut() {
            record.abort_all();
        }
    }
}

async fn run_attempt(
    weak: Weak<ManagerInner>,
    device_id: String,
    epoch: u64,
    options: ConnectOptions,
    initial: bool,
) -> Result<(), TransportError> {
    let Some(inner) = weak.upgrade() else {
        return Err(TransportError::Cancelled(device_id));
    };

    match inner.establish(&device_id, epoch, &options).await {
        Ok(live) => match inner.register_live(&device_id, epoch, live) {
            Ok(()) => Ok(()),
            Err(mut live) => {
                debug!(device_id = %device_id, "Connection closed during connect, dropping socket");
                close_socket(&mut live.socket, &live.subscription_id).await;
                Err(TransportError::Cancelled(device_id))
            }
        },
        Err(error) => {
            inner.attempt_failed(&device_id, epoch, &error, initial);
            Err(error)
        }
    }
}

/// Reader loop of one live socket. Also runs the idle heartbeat.
async fn run_socket(
    weak: Weak<ManagerInner>,
    device_id: String,
    epoch: u64,
    live: LiveSocket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    config: RealtimeConfig,
) {
    let LiveSocket {
        mut socket,
        subscription_id,
    } = live;
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_frame = Instant::now();

    let lost = loop {
        let step = tokio::select! {
            event = socket.next_event() => Step::Event(event),
            _ = heartbeat.tick() => Step::Heartbeat,
            command = commands.recv() => Step::Command(command),
        };

        match step {
            Step::Event(SocketEvent::Text(text)) => {
                last_frame = Instant::now();
                let Some(inner) = weak.upgrade() else {
                    break None;
                };
                if let Some(error) = inner.handle_frame(&device_id, epoch, &subscription_id, &text) {
                    close_socket(&mut socket, &subscription_id).await;
                    break Some(error);
                }
            }
            Step::Event(SocketEvent::Alive) => {
                last_frame = Instant::now();
                let Some(inner) = weak.upgrade() else {
                    break None;
                };
                inner.touch(&device_id, epoch);
            }
            Step::Event(SocketEvent::Closed { code, reason }) => {
                break Some(TransportError::Closed { code, reason });
            }
            Step::Event(SocketEvent::Error(error)) => break Some(error),
            Step::Heartbeat => {
                let idle = last_frame.elapsed();
                if idle > config.idle_timeout {
                    warn!(device_id = %device_id, idle_secs = idle.as_secs(), "Realtime socket idle, closing");
                    close_socket(&mut socket, &subscription_id).await;
                    break Some(TransportError::Closed {
                        code: None,
                        reason: "idle timeout".to_string(),
                    });
                }
            }
            Step::Command(Some(Command::Close)) | Step::Command(None) => {
                close_socket(&mut socket, &subscription_id).await;
                break None;
            }
        }
    };

    if let Some(error) = lost {
        if let Some(inner) = weak.upgrade() {
            inner.connection_lost(&device_id, epoch, error);
        }
    }
}

/// Send `stop` and close; drop the socket if that does not finish in time.
async fn close_socket(socket: &mut Box<dyn RealtimeSocket>, subscription_id: &str) {
    let graceful = async {
        if let Ok(stop) = (ClientFrame::Stop {
            id: subscription_id.to_string(),
        })
        .to_json()
        {
            let _ = socket.send_text(stop).await;
        }
        socket.close().await
    };

    match timeout(CLOSE_GRACE, graceful).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error while closing socket"),
        Err(_) => warn!("Graceful close timed out, dropping socket"),
    }
}

fn subscription_variables(variable: &str, device_id: &str, extra: Option<&Value>) -> Value {
    let mut variables = match extra {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    variables.insert(variable.to_string(), Value::String(device_id.to_string()));
    Value::Object(variables)
}
