//! Sensor sampler: bounded reads with physical plausibility checks.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::alert::AlertFlags;
use crate::config::{SensorConfig, SensorKind};
use crate::error::{SensorError, SensorFault};
use crate::reading::Reading;

/// One raw measurement as produced by a driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub temperature: f32,
    pub humidity: f32,
}

/// Temperature/humidity sensor driver.
#[async_trait]
pub trait Sensor: Send {
    /// Perform one read, giving up after `timeout`.
    async fn read(&mut self, timeout: Duration) -> Result<RawSample, SensorFault>;
}

/// Counters for sampler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub samples_taken: u64,
    pub unavailable: u64,
    pub implausible: u64,
}

/// Wraps a [`Sensor`] with a timeout and physical range validation.
pub struct Sampler<S> {
    sensor: S,
    kind: SensorKind,
    timeout: Duration,
    stats: SamplerStats,
}

impl<S: Sensor> Sampler<S> {
    pub fn new(sensor: S, config: &SensorConfig) -> Self {
        debug!(pin = config.pin, kind = %config.kind, "Sensor sampler initialised");
        Self {
            sensor,
            kind: config.kind,
            timeout: config.timeout,
            stats: SamplerStats::default(),
        }
    }

    /// Take one sample stamped with `timestamp_ms`.
    ///
    /// The returned reading carries no alert flags yet.
    pub async fn sample(&mut self, timestamp_ms: u64) -> Result<Reading, SensorError> {
        // The driver is handed the timeout too; this bound holds even if it ignores it
        let raw = match tokio::time::timeout(self.timeout, self.sensor.read(self.timeout)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(fault)) => return Err(self.unavailable(fault)),
            Err(_) => return Err(self.unavailable(SensorFault::Timeout)),
        };

        if !self.is_plausible(&raw) {
            self.stats.implausible += 1;
            debug!(
                temperature = raw.temperature,
                humidity = raw.humidity,
                kind = %self.kind,
                "Discarding physically implausible sample"
            );
            return Err(SensorError::Implausible {
                temperature: raw.temperature,
                humidity: raw.humidity,
            });
        }

        self.stats.samples_taken += 1;
        debug!(
            temperature = raw.temperature,
            humidity = raw.humidity,
            timestamp_ms = timestamp_ms,
            "Sensor sample taken"
        );
        Ok(Reading::new(
            timestamp_ms,
            raw.temperature,
            raw.humidity,
            AlertFlags::default(),
        ))
    }

    fn unavailable(&mut self, fault: SensorFault) -> SensorError {
        self.stats.unavailable += 1;
        debug!(error = %fault, "Sensor read failed");
        SensorError::Unavailable(fault)
    }

    fn is_plausible(&self, raw: &RawSample) -> bool {
        let (t_min, t_max) = self.kind.temperature_range();
        let (h_min, h_max) = self.kind.humidity_range();
        raw.temperature.is_finite()
            && raw.humidity.is_finite()
            && (t_min..=t_max).contains(&raw.temperature)
            && (h_min..=h_max).contains(&raw.humidity)
    }

    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }
}
