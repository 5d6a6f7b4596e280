//! Per-device connection records and their observable state.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::fmt;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::TransportError;
use crate::models::UpdateCallback;

/// Observable state of one device's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Handshaking,
    Subscribed,
    /// Subscribed, but the server reported an error on the subscription.
    Degraded,
}

impl SubscriptionState {
    /// A socket is open and the subscription was started.
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionState::Subscribed | SubscriptionState::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Disconnected => "disconnected",
            SubscriptionState::Connecting => "connecting",
            SubscriptionState::Handshaking => "handshaking",
            SubscriptionState::Subscribed => "subscribed",
            SubscriptionState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-device subscription settings.
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Overrides the configured subscription document.
    pub query: Option<String>,
    /// Extra variables; the device id variable is always added.
    pub variables: Option<Value>,
    /// Called with every update delivered for this device.
    pub on_update: Option<UpdateCallback>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_callback(mut self, callback: UpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("query", &self.query)
            .field("variables", &self.variables)
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

/// Whether a record still accepts data and reconnects.
///
/// A record that finished closing is removed from the map, so tasks that
/// outlive it find either nothing or a record with a newer epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active,
    ManuallyClosing,
}

pub(crate) enum Command {
    Close,
}

pub(crate) type PendingConnect = Shared<BoxFuture<'static, Result<(), TransportError>>>;

pub(crate) struct ConnectionRecord {
    pub device_id: String,
    /// Distinguishes this record from earlier ones for the same device.
    pub epoch: u64,
    pub options: ConnectOptions,
    pub lifecycle: Lifecycle,
    pub state: watch::Sender<SubscriptionState>,
    pub reconnect_attempts: u32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
    /// Reader loop of the live socket; owns the heartbeat.
    pub socket_task: Option<JoinHandle<()>>,
    pub commands: Option<mpsc::UnboundedSender<Command>>,
    pub attempt_task: Option<AbortHandle>,
    pub pending_connect: Option<PendingConnect>,
    pub reconnect_timer: Option<JoinHandle<()>>,
    /// Identifies the current reconnect timer.
    pub timer_seq: u64,
}

impl ConnectionRecord {
    pub fn new(device_id: &str, epoch: u64, options: ConnectOptions) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Disconnected);
        Self {
            device_id: device_id.to_string(),
            epoch,
            options,
            lifecycle: Lifecycle::Active,
            state,
            reconnect_attempts: 0,
            last_message_at: None,
            subscription_id: None,
            socket_task: None,
            commands: None,
            attempt_task: None,
            pending_connect: None,
            reconnect_timer: None,
            timer_seq: 0,
        }
    }

    pub fn is_active(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.lifecycle == Lifecycle::Active
    }

    pub fn set_state(&self, state: SubscriptionState) {
        self.state.send_replace(state);
    }

    pub fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    /// Abort every task this record owns.
    pub fn abort_all(&mut self) {
        self.cancel_reconnect_timer();
        if let Some(attempt) = self.attempt_task.take() {
            attempt.abort();
        }
        if let Some(task) = self.socket_task.take() {
            task.abort();
        }
        self.pending_connect = None;
        self.commands = None;
    }
}
