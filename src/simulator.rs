//! Simulated drivers for running the agent on a host.
//!
//! [`SimulatedSensor`] produces a slow random walk around a base climate with
//! occasional read faults, roughly what a DHT22 on a desk reports.
//! [`SimulatedRadio`] associates after a fixed delay and sometimes never
//! finishes associating, which exercises the connect timeout.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::config::SensorKind;
use crate::connectivity::{LinkStatus, Radio, WifiCredentials};
use crate::error::{ConnectionError, SensorFault};
use crate::sampler::{RawSample, Sensor};

/// Time a single-wire transaction takes on the bus.
const READ_LATENCY: Duration = Duration::from_millis(25);

/// Configuration for the simulated drivers.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Starting temperature in °C
    pub base_temperature: f32,

    /// Starting relative humidity in %RH
    pub base_humidity: f32,

    /// Maximum change per read, applied to both quantities
    pub drift: f32,

    /// Probability (0.0 - 1.0) that a read fails
    pub fault_rate: f64,

    /// Time from connect to link up
    pub association_delay: Duration,

    /// Probability (0.0 - 1.0) that an association never completes
    pub association_failure_rate: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_temperature: 22.0,
            base_humidity: 45.0,
            drift: 0.3,
            fault_rate: 0.05, // 5% failed reads
            association_delay: Duration::from_millis(1500),
            association_failure_rate: 0.02,
        }
    }
}

pub struct SimulatedSensor {
    kind: SensorKind,
    config: SimulatorConfig,
    temperature: f32,
    humidity: f32,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(kind: SensorKind, config: SimulatorConfig) -> Self {
        Self::with_rng(kind, config, StdRng::from_entropy())
    }

    /// Deterministic sensor for reproducible runs.
    pub fn with_seed(kind: SensorKind, config: SimulatorConfig, seed: u64) -> Self {
        Self::with_rng(kind, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(kind: SensorKind, config: SimulatorConfig, rng: StdRng) -> Self {
        Self {
            kind,
            temperature: config.base_temperature,
            humidity: config.base_humidity,
            config,
            rng,
        }
    }

    fn step(&mut self) -> RawSample {
        let drift = self.config.drift.abs();
        let (t_min, t_max) = self.kind.temperature_range();
        let (h_min, h_max) = self.kind.humidity_range();

        if drift > 0.0 {
            self.temperature += self.rng.gen_range(-drift..=drift);
            self.humidity += self.rng.gen_range(-drift..=drift) * 2.0;
        }
        self.temperature = self.temperature.clamp(t_min, t_max);
        self.humidity = self.humidity.clamp(h_min, h_max);

        // DHT22 resolution is 0.1
        RawSample {
            temperature: (self.temperature * 10.0).round() / 10.0,
            humidity: (self.humidity * 10.0).round() / 10.0,
        }
    }
}

#[async_trait]
impl Sensor for SimulatedSensor {
    async fn read(&mut self, timeout: Duration) -> Result<RawSample, SensorFault> {
        sleep(READ_LATENCY.min(timeout)).await;

        if self.rng.gen_bool(self.config.fault_rate.clamp(0.0, 1.0)) {
            let fault = if self.rng.gen_bool(0.8) {
                SensorFault::Checksum
            } else {
                SensorFault::Timeout
            };
            trace!(fault = %fault, "Simulated sensor fault");
            return Err(fault);
        }

        Ok(self.step())
    }
}

pub struct SimulatedRadio {
    config: SimulatorConfig,
    up_at: Option<Instant>,
    associating: bool,
    rng: StdRng,
}

impl SimulatedRadio {
    pub fn new(config: SimulatorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: SimulatorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulatorConfig, rng: StdRng) -> Self {
        Self {
            config,
            up_at: None,
            associating: false,
            rng,
        }
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn connect(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectionError> {
        if credentials.ssid.is_empty() {
            return Err(ConnectionError::Refused("no SSID configured".to_string()));
        }

        self.associating = true;
        let stalls = self
            .rng
            .gen_bool(self.config.association_failure_rate.clamp(0.0, 1.0));
        self.up_at = if stalls {
            trace!(ssid = %credentials.ssid, "Simulated association stall");
            None
        } else {
            Some(Instant::now() + self.config.association_delay)
        };
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.up_at = None;
        self.associating = false;
    }

    fn status(&self) -> LinkStatus {
        match self.up_at {
            Some(at) if Instant::now() >= at => LinkStatus::Up,
            _ if self.associating => LinkStatus::Associating,
            _ => LinkStatus::Down,
        }
    }
}
