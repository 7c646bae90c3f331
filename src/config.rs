//! Configuration module for the telemetry agent.
//!
//! Every tunable of the agent (network credentials, collector endpoint,
//! sensor timing, retry policy, alert thresholds, storage, power and debug
//! flags) is loaded once at boot from `AGENT_*` environment variables,
//! validated, and then passed by reference into each component constructor.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::alert::AlertThresholds;
use crate::reading::DeviceIdentity;
use crate::tls::Fingerprint;

/// Default collector endpoint
const DEFAULT_SERVER_URL: &str = "http://194.163.142.108:5005/api/sensor-data";

/// Default GPIO for the sensor data line (NodeMCU D4)
const DEFAULT_SENSOR_PIN: u8 = 2;

const DEFAULT_SENSOR_READ_INTERVAL_MS: u64 = 10_000;
const DEFAULT_SENSOR_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SEND_INTERVAL_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
const DEFAULT_WIFI_TIMEOUT_MS: u64 = 30_000;

/// Per-attempt HTTP timeout
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_DEEP_SLEEP_DURATION_MS: u64 = 60_000;
const DEFAULT_MAX_LOCAL_RECORDS: usize = 100;
const DEFAULT_STORAGE_PATH: &str = "agent-records.bin";

const DEFAULT_DEVICE_ID: &str = "ESP8266_001";
const DEFAULT_FIRMWARE_VERSION: &str = "1.0.0";
const DEFAULT_USER_AGENT: &str = "ESP8266-DHT22/1.0";

/// Upper bound on attempts per send interval
const MAX_RETRIES_LIMIT: u32 = 10;

/// Upper bound on buffered records
const MAX_LOCAL_RECORDS_LIMIT: usize = 10_000;

/// Error type for configuration loading and validation failures.
///
/// All of these are fatal at boot: the agent refuses to run with an invalid
/// threshold or with authentication silently disabled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed
    #[error("Configuration error for {var}: {message}")]
    InvalidValue { var: String, message: String },

    /// A value parsed but lies outside its allowed range
    #[error("Configuration error: {field} {message}")]
    InvalidRange { field: &'static str, message: String },

    /// A credential required for operation is missing or empty
    #[error("Configuration error: missing credential {field}")]
    MissingCredential { field: &'static str },
}

/// Supported sensor families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Dht11,
    Dht22,
}

impl SensorKind {
    /// Physically plausible temperature range in °C, per datasheet.
    pub fn temperature_range(&self) -> (f32, f32) {
        match self {
            SensorKind::Dht11 => (0.0, 50.0),
            SensorKind::Dht22 => (-40.0, 80.0),
        }
    }

    /// Physically plausible relative humidity range in %RH, per datasheet.
    pub fn humidity_range(&self) -> (f32, f32) {
        match self {
            SensorKind::Dht11 => (20.0, 90.0),
            SensorKind::Dht22 => (0.0, 100.0),
        }
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DHT11" => Ok(SensorKind::Dht11),
            "DHT22" | "AM2302" => Ok(SensorKind::Dht22),
            other => Err(format!("unknown sensor type '{}'", other)),
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Dht11 => write!(f, "DHT11"),
            SensorKind::Dht22 => write!(f, "DHT22"),
        }
    }
}

/// Wireless network settings.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,

    /// Maximum time `ensure_connected` may block
    pub connect_timeout: Duration,
}

/// Collector endpoint and transport security.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub url: String,
    pub enable_ssl: bool,

    /// SHA-256 fingerprint of the collector certificate, required with SSL
    pub fingerprint: Option<Fingerprint>,
}

/// Sensor wiring and sampling cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub pin: u8,
    pub kind: SensorKind,
    pub read_interval: Duration,
    pub timeout: Duration,
}

/// Send cadence and retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    pub send_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,

    /// Maximum readings per request; defaults to the buffer capacity
    pub max_batch_size: usize,
}

/// Local buffer capacity and optional persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub enabled: bool,
    pub max_records: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerConfig {
    pub deep_sleep: bool,
    pub deep_sleep_duration: Duration,
}

/// Diagnostic verbosity switches.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugConfig {
    pub serial: bool,
    pub http: bool,
    pub sensor: bool,
}

impl DebugConfig {
    /// Tracing filter directives equivalent to the debug switches.
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![if self.serial { "info" } else { "warn" }.to_string()];
        if self.http {
            directives.push("telemetry_agent::delivery=debug".to_string());
            directives.push("telemetry_agent::transport=debug".to_string());
        }
        if self.sensor {
            directives.push("telemetry_agent::sampler=debug".to_string());
        }
        directives.join(",")
    }
}

/// Complete, immutable agent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub identity: DeviceIdentity,
    pub sensor: SensorConfig,
    pub delivery: DeliveryConfig,
    pub alerts: AlertThresholds,
    pub storage: StorageConfig,
    pub power: PowerConfig,
    pub debug: DebugConfig,
}

impl Config {
    /// Load configuration from environment variables and validate it.
    ///
    /// `AGENT_WIFI_SSID` and `AGENT_API_KEY` have no defaults; everything
    /// else falls back to the stock device values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable fails to parse, a range check
    /// fails, or a credential is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ssid = env::var("AGENT_WIFI_SSID").unwrap_or_default();
        let password = env::var("AGENT_WIFI_PASSWORD").unwrap_or_default();
        let api_key = env::var("AGENT_API_KEY").unwrap_or_default();

        let url = env::var("AGENT_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string())
            .trim()
            .to_string();

        let enable_ssl = parse_bool("AGENT_ENABLE_SSL", false)?;
        let fingerprint = match env::var("AGENT_SSL_FINGERPRINT") {
            Ok(value) if !value.trim().is_empty() => {
                Some(value.parse::<Fingerprint>().map_err(|message| {
                    ConfigError::InvalidValue {
                        var: "AGENT_SSL_FINGERPRINT".to_string(),
                        message,
                    }
                })?)
            }
            _ => None,
        };

        let max_records = parse_var("AGENT_MAX_LOCAL_RECORDS", DEFAULT_MAX_LOCAL_RECORDS)?;

        let config = Self {
            network: NetworkConfig {
                ssid,
                password,
                connect_timeout: parse_millis("AGENT_WIFI_TIMEOUT_MS", DEFAULT_WIFI_TIMEOUT_MS)?,
            },
            server: ServerConfig {
                url,
                enable_ssl,
                fingerprint,
            },
            identity: DeviceIdentity {
                device_id: parse_var("AGENT_DEVICE_ID", DEFAULT_DEVICE_ID.to_string())?,
                firmware_version: parse_var(
                    "AGENT_FIRMWARE_VERSION",
                    DEFAULT_FIRMWARE_VERSION.to_string(),
                )?,
                user_agent: parse_var("AGENT_USER_AGENT", DEFAULT_USER_AGENT.to_string())?,
                api_key,
            },
            sensor: SensorConfig {
                pin: parse_var("AGENT_SENSOR_PIN", DEFAULT_SENSOR_PIN)?,
                kind: parse_var("AGENT_SENSOR_TYPE", SensorKind::Dht22)?,
                read_interval: parse_millis(
                    "AGENT_SENSOR_READ_INTERVAL_MS",
                    DEFAULT_SENSOR_READ_INTERVAL_MS,
                )?,
                timeout: parse_millis("AGENT_SENSOR_TIMEOUT_MS", DEFAULT_SENSOR_TIMEOUT_MS)?,
            },
            delivery: DeliveryConfig {
                send_interval: parse_millis("AGENT_SEND_INTERVAL_MS", DEFAULT_SEND_INTERVAL_MS)?,
                max_retries: parse_var("AGENT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                retry_delay: parse_millis("AGENT_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?,
                request_timeout: parse_millis(
                    "AGENT_REQUEST_TIMEOUT_MS",
                    DEFAULT_REQUEST_TIMEOUT_MS,
                )?,
                max_batch_size: parse_var("AGENT_MAX_BATCH_SIZE", max_records)?,
            },
            alerts: AlertThresholds {
                temp_min: parse_var("AGENT_TEMP_MIN", 0.0)?,
                temp_max: parse_var("AGENT_TEMP_MAX", 50.0)?,
                humidity_min: parse_var("AGENT_HUMIDITY_MIN", 0.0)?,
                humidity_max: parse_var("AGENT_HUMIDITY_MAX", 100.0)?,
            },
            storage: StorageConfig {
                enabled: parse_bool("AGENT_ENABLE_LOCAL_STORAGE", false)?,
                max_records,
                path: env::var("AGENT_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_PATH)),
            },
            power: PowerConfig {
                deep_sleep: parse_bool("AGENT_ENABLE_DEEP_SLEEP", false)?,
                deep_sleep_duration: parse_millis(
                    "AGENT_DEEP_SLEEP_DURATION_MS",
                    DEFAULT_DEEP_SLEEP_DURATION_MS,
                )?,
            },
            debug: DebugConfig {
                serial: parse_bool("AGENT_DEBUG_SERIAL", true)?,
                http: parse_bool("AGENT_DEBUG_HTTP", false)?,
                sensor: parse_bool("AGENT_DEBUG_SENSOR", true)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every range and credential constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.ssid.trim().is_empty() {
            return Err(ConfigError::MissingCredential { field: "wifi_ssid" });
        }
        if self.identity.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential { field: "api_key" });
        }
        for (field, value) in [
            ("device_id", &self.identity.device_id),
            ("firmware_version", &self.identity.firmware_version),
            ("user_agent", &self.identity.user_agent),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidRange {
                    field,
                    message: "must not be empty".to_string(),
                });
            }
        }

        let url = reqwest::Url::parse(&self.server.url).map_err(|e| ConfigError::InvalidRange {
            field: "server_url",
            message: format!("'{}' is not a valid URL: {}", self.server.url, e),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::InvalidRange {
                    field: "server_url",
                    message: format!("unsupported scheme '{}'", other),
                })
            }
        }
        if self.server.enable_ssl {
            if self.server.fingerprint.is_none() {
                return Err(ConfigError::MissingCredential {
                    field: "ssl_fingerprint",
                });
            }
            if url.scheme() != "https" {
                return Err(ConfigError::InvalidRange {
                    field: "server_url",
                    message: "must use https when SSL is enabled".to_string(),
                });
            }
        }

        for (field, value) in [
            ("wifi_timeout", self.network.connect_timeout),
            ("sensor_read_interval", self.sensor.read_interval),
            ("sensor_timeout", self.sensor.timeout),
            ("send_interval", self.delivery.send_interval),
            ("request_timeout", self.delivery.request_timeout),
            ("deep_sleep_duration", self.power.deep_sleep_duration),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidRange {
                    field,
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if self.delivery.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidRange {
                field: "max_retries",
                message: format!(
                    "{} exceeds maximum allowed ({})",
                    self.delivery.max_retries, MAX_RETRIES_LIMIT
                ),
            });
        }
        if self.delivery.max_batch_size == 0 {
            return Err(ConfigError::InvalidRange {
                field: "max_batch_size",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.storage.max_records == 0 || self.storage.max_records > MAX_LOCAL_RECORDS_LIMIT {
            return Err(ConfigError::InvalidRange {
                field: "max_local_records",
                message: format!(
                    "{} is outside 1..={}",
                    self.storage.max_records, MAX_LOCAL_RECORDS_LIMIT
                ),
            });
        }

        check_bounds("temperature thresholds", self.alerts.temp_min, self.alerts.temp_max)?;
        check_bounds(
            "humidity thresholds",
            self.alerts.humidity_min,
            self.alerts.humidity_max,
        )?;

        Ok(())
    }
}

impl Default for Config {
    /// Stock device values with placeholder credentials.
    ///
    /// This is useful for testing; `from_env` never falls back to the
    /// placeholder credentials.
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                ssid: "YOUR_WIFI_SSID".to_string(),
                password: "YOUR_WIFI_PASSWORD".to_string(),
                connect_timeout: Duration::from_millis(DEFAULT_WIFI_TIMEOUT_MS),
            },
            server: ServerConfig {
                url: DEFAULT_SERVER_URL.to_string(),
                enable_ssl: false,
                fingerprint: None,
            },
            identity: DeviceIdentity {
                device_id: DEFAULT_DEVICE_ID.to_string(),
                firmware_version: DEFAULT_FIRMWARE_VERSION.to_string(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
                api_key: "YOUR_API_KEY".to_string(),
            },
            sensor: SensorConfig {
                pin: DEFAULT_SENSOR_PIN,
                kind: SensorKind::Dht22,
                read_interval: Duration::from_millis(DEFAULT_SENSOR_READ_INTERVAL_MS),
                timeout: Duration::from_millis(DEFAULT_SENSOR_TIMEOUT_MS),
            },
            delivery: DeliveryConfig {
                send_interval: Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
                max_retries: DEFAULT_MAX_RETRIES,
                retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
                request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
                max_batch_size: DEFAULT_MAX_LOCAL_RECORDS,
            },
            alerts: AlertThresholds::default(),
            storage: StorageConfig {
                enabled: false,
                max_records: DEFAULT_MAX_LOCAL_RECORDS,
                path: PathBuf::from(DEFAULT_STORAGE_PATH),
            },
            power: PowerConfig {
                deep_sleep: false,
                deep_sleep_duration: Duration::from_millis(DEFAULT_DEEP_SLEEP_DURATION_MS),
            },
            debug: DebugConfig {
                serial: true,
                http: false,
                sensor: true,
            },
        }
    }
}

fn check_bounds(field: &'static str, min: f32, max: f32) -> Result<(), ConfigError> {
    if !min.is_finite() || !max.is_finite() {
        return Err(ConfigError::InvalidRange {
            field,
            message: "must be finite".to_string(),
        });
    }
    if min >= max {
        return Err(ConfigError::InvalidRange {
            field,
            message: format!("min {} must be below max {}", min, max),
        });
    }
    Ok(())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_var<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|e| ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("'{}' is not valid: {}", value, e),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_millis(var: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    parse_var(var, default_ms).map(Duration::from_millis)
}

fn parse_bool(var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var: var.to_string(),
                message: format!("'{}' is not a valid boolean", value),
            }),
        },
        Err(_) => Ok(default),
    }
}
