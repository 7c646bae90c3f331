//! Telemetry Agent Library
//!
//! This library provides the components of a temperature/humidity telemetry
//! agent for resource-constrained devices:
//!
//! - **config**: Environment-based configuration, validated once at boot
//! - **scheduler**: Monotonic timers driving sampling and sending
//! - **sampler**: Sensor reads with timeout and plausibility checks
//! - **alert**: Threshold classification of readings
//! - **buffer** / **storage**: Bounded FIFO-overwrite buffer with an optional persistent mirror
//! - **connectivity**: Wireless link lifecycle with a bounded connect
//! - **delivery** / **transport** / **tls**: Batched HTTP delivery with fixed-delay retry and certificate pinning
//! - **power**: Deep-sleep decisions
//! - **agent**: The loop composing all of the above
//! - **simulator**: Simulated sensor and radio drivers for host runs
//!
//! # Example
//!
//! ```no_run
//! use telemetry_agent::agent::{Agent, Hardware};
//! use telemetry_agent::config::Config;
//! use telemetry_agent::simulator::{SimulatedRadio, SimulatedSensor, SimulatorConfig};
//! use telemetry_agent::transport::HttpTransport;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let transport = HttpTransport::new(&config.server, config.delivery.request_timeout)
//!         .expect("Failed to create transport");
//!
//!     let hardware = Hardware {
//!         sensor: SimulatedSensor::new(config.sensor.kind, SimulatorConfig::default()),
//!         radio: SimulatedRadio::new(SimulatorConfig::default()),
//!         transport,
//!         storage: None,
//!     };
//!
//!     let mut agent = Agent::new(&config, hardware).expect("Invalid configuration");
//!     agent.run().await;
//! }
//! ```

// Module declarations
pub mod agent;
pub mod alert;
pub mod buffer;
pub mod config;
pub mod connectivity;
pub mod delivery;
pub mod error;
pub mod power;
pub mod reading;
pub mod sampler;
pub mod scheduler;
pub mod simulator;
pub mod storage;
pub mod tls;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root for convenience
pub use agent::{Agent, AgentState, AgentStats, CycleReport, Hardware, SampleOutcome};
pub use alert::{classify, AlertFlags, AlertThresholds, ThresholdAlerter};
pub use buffer::{BufferStats, DeliveryBatch, LocalBuffer};
pub use config::{Config, ConfigError, SensorKind};
pub use connectivity::{ConnectionState, ConnectivityManager, LinkStatus, Radio, WifiCredentials};
pub use delivery::{DeliveryOutcome, DeliveryPipeline, DeliveryRequest, Transport, TransportResponse};
pub use error::{ConnectionError, DeliveryError, SensorError, SensorFault, StorageError, TransportError};
pub use power::{PowerDecision, PowerManager};
pub use reading::{DeliveryPayload, DeviceIdentity, Reading};
pub use sampler::{RawSample, Sampler, Sensor};
pub use storage::{FileStorage, RecordStore, Storage};
pub use transport::HttpTransport;
