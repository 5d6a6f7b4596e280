use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a device update came from.
///
/// Callers apply different trust and merge rules per origin: realtime pushes
/// are the freshest, polled listings may lag, external triggers are polls
/// caused by another device's event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    Realtime,
    Polled,
    External,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Realtime => "realtime",
            UpdateSource::Polled => "polled",
            UpdateSource::External => "external",
        }
    }
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payload delivered to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdate {
    pub device_id: String,
    pub payload: serde_json::Value,
    pub source: UpdateSource,
    pub timestamp: DateTime<Utc>,
}

impl DataUpdate {
    pub fn new(device_id: impl Into<String>, payload: serde_json::Value, source: UpdateSource) -> Self {
        Self {
            device_id: device_id.into(),
            payload,
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Device-facing `onDataUpdate` callback.
pub type UpdateCallback = Arc<dyn Fn(DataUpdate) + Send + Sync>;
