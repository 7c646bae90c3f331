//! The agent loop: one cooperative task composing every component.
//!
//! Each [`Agent::step`] waits for the scheduler, samples if the sampling
//! timer fired, runs the delivery pipeline if the send interval fired, and
//! finally lets the power manager decide on deep sleep. A push into the
//! buffer never interleaves with a delivery tick because both happen
//! sequentially inside the same step.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alert::{AlertFlags, ThresholdAlerter};
use crate::buffer::{BufferStats, LocalBuffer};
use crate::config::{Config, ConfigError};
use crate::connectivity::{ConnectivityManager, ConnectivityStats, Radio};
use crate::delivery::{DeliveryOutcome, DeliveryPipeline, DeliveryStats, Transport};
use crate::error::SensorError;
use crate::power::{PowerDecision, PowerManager};
use crate::sampler::{Sampler, SamplerStats, Sensor};
use crate::scheduler::{Due, Scheduler};
use crate::storage::{RecordStore, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Sampling,
    Buffering,
    Delivering,
    Sleeping,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Sampling => write!(f, "sampling"),
            AgentState::Buffering => write!(f, "buffering"),
            AgentState::Delivering => write!(f, "delivering"),
            AgentState::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// Drivers handed to the agent at boot.
pub struct Hardware<S, R, T> {
    pub sensor: S,
    pub radio: R,
    pub transport: T,

    /// Persistent media for the buffer; only used with local storage enabled
    pub storage: Option<Box<dyn Storage>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// The sampling timer did not fire this cycle
    NotDue,

    /// A reading was tagged and pushed into the buffer
    Buffered { alerts: AlertFlags },

    /// No reading this cycle
    Failed(SensorError),
}

/// What happened during one [`Agent::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub uptime_ms: u64,
    pub due: Due,
    pub sample: SampleOutcome,
    pub delivery: Option<DeliveryOutcome>,
    pub power: PowerDecision,

    /// Buffer length at the end of the cycle
    pub buffered: usize,
}

/// Counters collected from every component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub cycles: u64,
    pub sampler: SamplerStats,
    pub buffer: BufferStats,
    pub delivery: DeliveryStats,
    pub connectivity: ConnectivityStats,
}

pub struct Agent<S, R, T> {
    state: AgentState,
    scheduler: Scheduler,
    sampler: Sampler<S>,
    alerter: ThresholdAlerter,
    buffer: LocalBuffer,
    link: ConnectivityManager<R>,
    pipeline: DeliveryPipeline<T>,
    power: PowerManager,
    cycles: u64,
}

impl<S: Sensor, R: Radio, T: Transport> Agent<S, R, T> {
    /// Validate `config` and build every component.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found. A storage device that cannot
    /// be opened is not an error: the buffer then runs RAM-only.
    pub fn new(config: &Config, hardware: Hardware<S, R, T>) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffer = match hardware.storage {
            Some(storage) if config.storage.enabled => {
                match RecordStore::new(storage, config.storage.max_records) {
                    Ok(store) => LocalBuffer::with_store(store),
                    Err(e) => {
                        warn!(error = %e, "Local storage unavailable, buffering in RAM only");
                        LocalBuffer::new(config.storage.max_records)
                    }
                }
            }
            _ => LocalBuffer::new(config.storage.max_records),
        };

        info!(
            device_id = %config.identity.device_id,
            firmware_version = %config.identity.firmware_version,
            sensor = %config.sensor.kind,
            capacity = buffer.capacity(),
            persistent = buffer.is_persistent(),
            recovered = buffer.stats().readings_recovered,
            deep_sleep = config.power.deep_sleep,
            "Agent initialised"
        );

        Ok(Self {
            state: AgentState::Sampling,
            scheduler: Scheduler::new(config.sensor.read_interval, config.delivery.send_interval),
            sampler: Sampler::new(hardware.sensor, &config.sensor),
            alerter: ThresholdAlerter::new(config.alerts),
            buffer,
            link: ConnectivityManager::new(hardware.radio, &config.network),
            pipeline: DeliveryPipeline::new(hardware.transport, config),
            power: PowerManager::new(&config.power),
            cycles: 0,
        })
    }

    /// Wait for the next timer and run one full cycle.
    pub async fn step(&mut self) -> CycleReport {
        self.state = AgentState::Sampling;
        let due = self.scheduler.wait().await;
        let uptime_ms = self.scheduler.uptime_ms();

        let sample = if due.sample {
            self.sample(uptime_ms).await
        } else {
            SampleOutcome::NotDue
        };

        let delivery = if due.send {
            self.state = AgentState::Delivering;
            let outcome = self.pipeline.run_tick(&mut self.link, &mut self.buffer).await;
            self.log_stats();
            Some(outcome)
        } else {
            None
        };

        let power = self.power.decide(
            self.pipeline.is_idle(),
            self.scheduler.send_due(Instant::now()),
        );
        if let PowerDecision::DeepSleep(duration) = power {
            self.state = AgentState::Sleeping;
            self.power.enter_sleep(&mut self.link, duration).await;
        }

        self.cycles += 1;
        self.state = AgentState::Sampling;

        CycleReport {
            uptime_ms,
            due,
            sample,
            delivery,
            power,
            buffered: self.buffer.len(),
        }
    }

    async fn sample(&mut self, uptime_ms: u64) -> SampleOutcome {
        match self.sampler.sample(uptime_ms).await {
            Ok(reading) => {
                let alerts = self.alerter.evaluate(reading.temperature, reading.humidity);
                self.state = AgentState::Buffering;
                self.buffer.push(reading.with_alerts(alerts));
                debug!(buffered = self.buffer.len(), "Reading buffered");
                SampleOutcome::Buffered { alerts }
            }
            Err(e) => {
                warn!(error = %e, uptime_ms = uptime_ms, "No sample this cycle");
                SampleOutcome::Failed(e)
            }
        }
    }

    /// Run forever.
    pub async fn run(&mut self) {
        info!("Agent loop started");
        loop {
            self.step().await;
        }
    }

    fn log_stats(&self) {
        let stats = self.stats();
        info!(
            cycles = stats.cycles,
            samples = stats.sampler.samples_taken,
            sensor_failures = stats.sampler.unavailable + stats.sampler.implausible,
            buffered = self.buffer.len(),
            dropped = stats.buffer.readings_dropped,
            delivered = stats.delivery.readings_delivered,
            failed_attempts = stats.delivery.failed_attempts,
            connect_failures = stats.connectivity.connect_failures,
            "Agent status"
        );
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            cycles: self.cycles,
            sampler: self.sampler.stats().clone(),
            buffer: self.buffer.stats().clone(),
            delivery: self.pipeline.stats().clone(),
            connectivity: self.link.stats().clone(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn buffer(&self) -> &LocalBuffer {
        &self.buffer
    }

    pub fn pipeline(&self) -> &DeliveryPipeline<T> {
        &self.pipeline
    }

    pub fn link(&self) -> &ConnectivityManager<R> {
        &self.link
    }
}
