//! Wireless link lifecycle.
//!
//! The manager owns the [`ConnectionState`]; everything else only observes
//! it. Connecting is bounded by a timeout and never retried at this layer;
//! retry timing belongs to the delivery pipeline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::ConnectionError;

/// How often the radio status is polled while associating.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Link status as reported by the radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Down,
    Associating,
    Up,
}

/// Network credentials handed to the radio.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Wireless radio driver.
#[async_trait]
pub trait Radio: Send {
    /// Start associating with the network. May return before the link is up.
    async fn connect(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectionError>;

    /// Drop the link and power the radio down.
    async fn disconnect(&mut self);

    fn status(&self) -> LinkStatus;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(ConnectionError),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectivityStats {
    pub connect_attempts: u64,
    pub connect_failures: u64,
}

pub struct ConnectivityManager<R> {
    radio: R,
    credentials: WifiCredentials,
    state: ConnectionState,
    stats: ConnectivityStats,
}

impl<R: Radio> ConnectivityManager<R> {
    pub fn new(radio: R, config: &NetworkConfig) -> Self {
        Self {
            radio,
            credentials: WifiCredentials {
                ssid: config.ssid.clone(),
                password: config.password.clone(),
            },
            state: ConnectionState::Disconnected,
            stats: ConnectivityStats::default(),
        }
    }

    /// Return Connected if the link is (or can be brought) up within `timeout`.
    ///
    /// Never blocks longer than `timeout`; on failure the state is
    /// `Failed` and the radio is left disconnected for a fresh attempt.
    pub async fn ensure_connected(&mut self, timeout: Duration) -> ConnectionState {
        if self.state.is_connected() {
            if self.radio.status() == LinkStatus::Up {
                return self.state.clone();
            }
            warn!(ssid = %self.credentials.ssid, "Wireless link lost");
            self.state = ConnectionState::Disconnected;
        }

        self.state = ConnectionState::Connecting;
        self.stats.connect_attempts += 1;
        info!(
            ssid = %self.credentials.ssid,
            timeout_ms = timeout.as_millis() as u64,
            "Connecting to wireless network"
        );

        let outcome = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Timeout),
        };

        self.state = match outcome {
            Ok(()) => {
                info!(ssid = %self.credentials.ssid, "Wireless link up");
                ConnectionState::Connected
            }
            Err(e) => {
                warn!(ssid = %self.credentials.ssid, error = %e, "Wireless connection failed");
                self.stats.connect_failures += 1;
                self.radio.disconnect().await;
                ConnectionState::Failed(e)
            }
        };
        self.state.clone()
    }

    async fn establish(&mut self) -> Result<(), ConnectionError> {
        self.radio.connect(&self.credentials).await?;
        loop {
            match self.radio.status() {
                LinkStatus::Up => return Ok(()),
                status => debug!(status = ?status, "Waiting for wireless link"),
            }
            sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    /// Drop the link, e.g. before deep sleep.
    pub async fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!("Disconnecting wireless link");
        }
        self.radio.disconnect().await;
        self.state = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn stats(&self) -> &ConnectivityStats {
        &self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }
}
