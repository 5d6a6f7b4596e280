//! Configuration for the session and realtime layer.
//!
//! Built with `with_*` setters on top of [`HubConfig::default`], or from
//! `HUBLINK_*` environment variables with [`HubConfig::from_env`].
//!
//! ```ignore
//! use hublink::config::HubConfig;
//!
//! let config = HubConfig::default()
//!     .with_api_url("https://api.example.com/graphql")
//!     .with_realtime_url("wss://realtime.example.com/graphql")
//!     .with_identity_url("https://identity.example.com/")
//!     .with_client_id("abc123");
//! config.validate()?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::error::HubError;

/// Default device listing query, demultiplexed by the `id` field.
pub const DEFAULT_LISTING_QUERY: &str =
    "query ListDevices { listDevices { items { id name state updatedAt } } }";

/// Where the device array sits inside the listing response's `data`.
pub const DEFAULT_LISTING_POINTER: &str = "/listDevices/items";

/// Default per-device subscription.
pub const DEFAULT_SUBSCRIPTION_QUERY: &str = "subscription OnDeviceUpdate($deviceId: ID!) { onDeviceUpdate(id: $deviceId) { id state updatedAt } }";

/// Retry policy of the request client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,
    /// Upper bound for a single retry delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based), capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(retry))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Realtime connection timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// How long to wait for `connection_ack`.
    pub connect_timeout: Duration,
    /// How often the idle check runs once subscribed.
    pub heartbeat_interval: Duration,
    /// Silence longer than this closes the socket.
    pub idle_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Upper bound of the random addition to each reconnect delay.
    pub max_jitter: Duration,
    /// Subscription variable carrying the device id.
    pub device_id_variable: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(45),
            idle_timeout: Duration::from_secs(90),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_jitter: Duration::from_millis(500),
            device_id_variable: "deviceId".to_string(),
        }
    }
}

/// Shared polling timing.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    pub interval: Duration,
    /// Window collapsing registrations into one interval start.
    pub start_debounce: Duration,
    /// Window collapsing late registrations into one immediate poll.
    pub catch_up_debounce: Duration,
    /// Window collapsing external "poll now" signals.
    pub external_debounce: Duration,
    /// Field of each listed item matched against registered correlation keys.
    pub correlation_field: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            start_debounce: Duration::from_millis(100),
            catch_up_debounce: Duration::from_millis(150),
            external_debounce: Duration::from_secs(3),
            correlation_field: "id".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// JSON API endpoint receiving `{query, variables}` POSTs.
    pub api_url: String,
    /// Realtime subscription endpoint (`wss://`).
    pub realtime_url: String,
    /// Identity service endpoint.
    pub identity_url: String,
    /// Identity service application client id.
    pub client_id: String,
    /// Credential file; `None` uses `~/.hublink/credentials.json`.
    pub credentials_path: Option<PathBuf>,
    /// A session is treated as expired this long before its real expiry.
    pub validity_buffer: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub realtime: RealtimeConfig,
    pub polling: PollingConfig,
    pub listing_query: String,
    /// JSON pointer to the item array inside the listing response's `data`.
    pub listing_pointer: String,
    pub subscription_query: String,
    /// Sign out when the last polled device unregisters.
    pub sign_out_when_idle: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            realtime_url: String::new(),
            identity_url: String::new(),
            client_id: String::new(),
            credentials_path: None,
            validity_buffer: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            realtime: RealtimeConfig::default(),
            polling: PollingConfig::default(),
            listing_query: DEFAULT_LISTING_QUERY.to_string(),
            listing_pointer: DEFAULT_LISTING_POINTER.to_string(),
            subscription_query: DEFAULT_SUBSCRIPTION_QUERY.to_string(),
            sign_out_when_idle: false,
        }
    }
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `HUBLINK_*` environment variables.
    pub fn from_env() -> Result<Self, HubError> {
        let mut config = Self::default();

        if let Some(v) = env_string("HUBLINK_API_URL") {
            config.api_url = v;
        }
        if let Some(v) = env_string("HUBLINK_REALTIME_URL") {
            config.realtime_url = v;
        }
        if let Some(v) = env_string("HUBLINK_IDENTITY_URL") {
            config.identity_url = v;
        }
        if let Some(v) = env_string("HUBLINK_CLIENT_ID") {
            config.client_id = v;
        }
        if let Some(v) = env_string("HUBLINK_CREDENTIALS_PATH") {
            config.credentials_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("HUBLINK_LISTING_QUERY") {
            config.listing_query = v;
        }
        if let Some(v) = env_string("HUBLINK_LISTING_POINTER") {
            config.listing_pointer = v;
        }
        if let Some(v) = env_string("HUBLINK_SUBSCRIPTION_QUERY") {
            config.subscription_query = v;
        }
        if let Some(secs) = env_parse::<u64>("HUBLINK_POLL_INTERVAL_SECS")? {
            config.polling.interval = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("HUBLINK_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(secs) = env_parse::<u64>("HUBLINK_VALIDITY_BUFFER_SECS")? {
            config.validity_buffer = Duration::from_secs(secs);
        }
        if let Some(flag) = env_parse::<bool>("HUBLINK_SIGN_OUT_WHEN_IDLE")? {
            config.sign_out_when_idle = flag;
        }

        Ok(config)
    }

    /// Reject configurations the session layer cannot run with.
    pub fn validate(&self) -> Result<(), HubError> {
        let required = [
            ("api_url", &self.api_url),
            ("realtime_url", &self.realtime_url),
            ("identity_url", &self.identity_url),
            ("client_id", &self.client_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(config_error(format!("{} must be set", name)));
            }
        }

        if !(self.realtime_url.starts_with("ws://") || self.realtime_url.starts_with("wss://")) {
            return Err(config_error("realtime_url must be a ws:// or wss:// URL"));
        }
        if self.polling.interval.is_zero() {
            return Err(config_error("polling interval must be greater than zero"));
        }
        if self.realtime.heartbeat_interval.is_zero() || self.realtime.connect_timeout.is_zero() {
            return Err(config_error("realtime timings must be greater than zero"));
        }
        if self.realtime.idle_timeout < self.realtime.heartbeat_interval {
            return Err(config_error("idle_timeout must not be shorter than heartbeat_interval"));
        }
        if self.polling.correlation_field.is_empty() {
            return Err(config_error("correlation_field must be set"));
        }
        Ok(())
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = url.into();
        self
    }

    pub fn with_identity_url(mut self, url: impl Into<String>) -> Self {
        self.identity_url = url.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn with_validity_buffer(mut self, buffer: Duration) -> Self {
        self.validity_buffer = buffer;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_listing_query(mut self, query: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.listing_query = query.into();
        self.listing_pointer = pointer.into();
        self
    }

    pub fn with_subscription_query(mut self, query: impl Into<String>) -> Self {
        self.subscription_query = query.into();
        self
    }

    pub fn with_sign_out_when_idle(mut self, enabled: bool) -> Self {
        self.sign_out_when_idle = enabled;
        self
    }
}

fn config_error(message: impl Into<String>) -> HubError {
    HubError::Configuration {
        message: message.into(),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, HubError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| config_error(format!("{} has an invalid value: {}", key, raw))),
    }
}
