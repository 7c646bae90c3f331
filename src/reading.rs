//! Data model for sensor readings and the collector wire payload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::alert::AlertFlags;
use crate::buffer::DeliveryBatch;

/// Static identity of this device, fixed for the lifetime of the agent.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub firmware_version: String,
    pub user_agent: String,
    pub api_key: String,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("firmware_version", &self.firmware_version)
            .field("user_agent", &self.user_agent)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A single validated temperature/humidity sample.
///
/// Readings are immutable once created; the local buffer owns them until
/// they are acknowledged by the collector or evicted by overflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Milliseconds since agent boot (monotonic)
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,

    /// Wall-clock capture time, millisecond precision
    pub recorded_at: DateTime<Utc>,

    /// Temperature in °C
    pub temperature: f32,

    /// Relative humidity in %RH
    pub humidity: f32,

    #[serde(skip)]
    pub valid: bool,

    #[serde(rename = "alert_flags")]
    pub alerts: AlertFlags,
}

impl Reading {
    /// Create a valid reading captured now.
    pub fn new(timestamp_ms: u64, temperature: f32, humidity: f32, alerts: AlertFlags) -> Self {
        Self {
            timestamp_ms,
            recorded_at: now_millis(),
            temperature,
            humidity,
            valid: true,
            alerts,
        }
    }

    /// Attach alert classification.
    pub fn with_alerts(mut self, alerts: AlertFlags) -> Self {
        self.alerts = alerts;
        self
    }

    /// Override the wall-clock capture time.
    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }
}

/// Current UTC time truncated to whole milliseconds, so readings survive a
/// round trip through the persistent record format unchanged.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Request body sent to the collector.
///
/// `temperature` and `humidity` repeat the newest reading so collectors that
/// only understand a single sample per request still accept the payload.
#[derive(Debug, Serialize)]
pub struct DeliveryPayload<'a> {
    pub device_id: &'a str,
    pub firmware_version: &'a str,

    /// Stable across retries of the same batch, usable for de-duplication
    pub batch_id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,

    pub readings: Vec<&'a Reading>,
}

impl<'a> DeliveryPayload<'a> {
    pub fn new(identity: &'a DeviceIdentity, batch: &DeliveryBatch<'a>) -> Self {
        let latest = batch.readings().last().copied();
        Self {
            device_id: &identity.device_id,
            firmware_version: &identity.firmware_version,
            batch_id: batch.batch_id(),
            temperature: latest.map(|r| r.temperature),
            humidity: latest.map(|r| r.humidity),
            readings: batch.readings().to_vec(),
        }
    }

    /// Serialize to the JSON request body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
