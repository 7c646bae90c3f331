//! Telemetry Agent - temperature/humidity sampling with resilient delivery
//!
//! This binary runs the agent loop on a single-threaded runtime with the
//! simulated sensor and radio drivers and the real HTTP transport, so the
//! whole pipeline can be exercised against a collector from a host.
//!
//! ## Configuration
//!
//! Configuration is loaded from `AGENT_*` environment variables; the
//! required ones are:
//!
//! - `AGENT_WIFI_SSID`: Wireless network name
//! - `AGENT_API_KEY`: Collector API key
//! - `AGENT_SERVER_URL`: Collector endpoint (default: http://194.163.142.108:5005/api/sensor-data)
//! - `RUST_LOG`: Logging filter, overrides the `AGENT_DEBUG_*` switches

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_agent::agent::{Agent, Hardware};
use telemetry_agent::config::Config;
use telemetry_agent::simulator::{SimulatedRadio, SimulatedSensor, SimulatorConfig};
use telemetry_agent::storage::{FileStorage, Storage};
use telemetry_agent::transport::HttpTransport;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let loaded = Config::from_env();

    // Debug switches only apply once the configuration parsed
    let directives = match &loaded {
        Ok(config) => config.debug.filter_directives(),
        Err(_) => "info".to_string(),
    };
    init_tracing(&directives);

    info!("Starting Telemetry Agent...");

    let config = match loaded {
        Ok(config) => {
            info!(
                server_url = %config.server.url,
                device_id = %config.identity.device_id,
                read_interval_ms = config.sensor.read_interval.as_millis() as u64,
                send_interval_ms = config.delivery.send_interval.as_millis() as u64,
                max_retries = config.delivery.max_retries,
                ssl = config.server.enable_ssl,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let transport = match HttpTransport::new(&config.server, config.delivery.request_timeout) {
        Ok(transport) => {
            info!(pinned = transport.is_pinned(), "HTTP transport initialized");
            transport
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP transport");
            std::process::exit(1);
        }
    };

    let storage: Option<Box<dyn Storage>> = if config.storage.enabled {
        match FileStorage::open(&config.storage.path, config.storage.max_records) {
            Ok(storage) => Some(Box::new(storage)),
            Err(e) => {
                warn!(
                    path = %config.storage.path.display(),
                    error = %e,
                    "Failed to open local storage, buffering in RAM only"
                );
                None
            }
        }
    } else {
        None
    };

    let simulation = SimulatorConfig::default();
    let hardware = Hardware {
        sensor: SimulatedSensor::new(config.sensor.kind, simulation.clone()),
        radio: SimulatedRadio::new(simulation),
        transport,
        storage,
    };

    let mut agent = match Agent::new(&config, hardware) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Failed to initialise agent");
            std::process::exit(1);
        }
    };

    info!("Telemetry Agent running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = agent.run() => {}
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    }

    let stats = agent.stats();
    info!(
        cycles = stats.cycles,
        delivered = stats.delivery.readings_delivered,
        buffered = agent.buffer().len(),
        dropped = stats.buffer.readings_dropped,
        "Telemetry Agent stopped"
    );
}

/// Initialize the tracing subscriber. `RUST_LOG` takes precedence over `directives`.
fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
