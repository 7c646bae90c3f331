//! Runtime error taxonomy for the agent.
//!
//! Every variant here is non-fatal: the agent logs it and retries at the next
//! natural cycle boundary. Boot-time configuration failures live in
//! [`crate::config::ConfigError`] instead.

use thiserror::Error;

/// Low-level fault reported by a sensor driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorFault {
    /// The driver did not produce a frame within the read timeout
    #[error("read timed out")]
    Timeout,

    /// The frame arrived but its checksum did not match
    #[error("checksum mismatch")]
    Checksum,

    /// Any other bus-level failure
    #[error("bus fault: {0}")]
    Bus(String),
}

/// Errors produced by the sensor sampler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    /// The sensor could not be read this tick
    #[error("sensor unavailable: {0}")]
    Unavailable(SensorFault),

    /// The sensor answered with values outside its physical range
    #[error("implausible sample: temperature={temperature}, humidity={humidity}")]
    Implausible { temperature: f32, humidity: f32 },
}

/// Errors from establishing the wireless link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The link did not come up within the connect timeout
    #[error("connection timed out")]
    Timeout,

    /// The radio rejected the connection attempt
    #[error("connection refused: {0}")]
    Refused(String),
}

/// Errors reported by a [`crate::delivery::Transport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete within the request timeout
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established or was reset
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server certificate did not match the pinned fingerprint
    #[error("server certificate does not match pinned fingerprint")]
    CertificateMismatch,

    /// Any other transport failure
    #[error("transport error: {0}")]
    Other(String),
}

/// Errors from a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Timeout, connection reset or non-success status
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The collector refused the API key; retried like any other status
    #[error("collector rejected credentials (status {status})")]
    AuthRejected { status: u16 },

    /// The pinned certificate check failed
    #[error("certificate fingerprint mismatch")]
    CertificateMismatch,
}

impl DeliveryError {
    /// Whether another attempt within the same tick is allowed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::CertificateMismatch)
    }
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::CertificateMismatch => DeliveryError::CertificateMismatch,
            other => DeliveryError::TransportFailure(other.to_string()),
        }
    }
}

/// Errors from the persistent record store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange { slot: usize, capacity: usize },
}
