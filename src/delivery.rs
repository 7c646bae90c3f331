//! Delivery pipeline: batches buffered readings and sends them to the collector.
//!
//! Per send-interval tick the pipeline brings the link up, peeks the oldest
//! readings, and posts them with a fixed delay between attempts. Readings are
//! removed from the buffer only after the collector acknowledges them with a
//! 2xx status; a failed tick leaves the buffer exactly as it was. This gives
//! at-least-once delivery: a reading can be duplicated if an acknowledgment
//! is lost, but never dropped except by buffer overflow.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::buffer::LocalBuffer;
use crate::config::Config;
use crate::connectivity::{ConnectionState, ConnectivityManager, Radio};
use crate::error::{ConnectionError, DeliveryError, TransportError};
use crate::reading::{DeliveryPayload, DeviceIdentity};

/// One fully built HTTP request, reused verbatim for every retry of a batch.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub url: String,
    pub api_key: String,
    pub user_agent: String,
    pub batch_id: Uuid,

    /// Number of readings encoded in `body`
    pub readings: usize,

    /// JSON payload
    pub body: Vec<u8>,
}

impl std::fmt::Debug for DeliveryRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRequest")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("batch_id", &self.batch_id)
            .field("readings", &self.readings)
            .field("body_bytes", &self.body.len())
            .finish()
    }
}

/// Raw HTTP response as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP transport capability.
///
/// Implementations must honour `timeout` and must not leave a partially
/// sent request behind that a later attempt could duplicate.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &DeliveryRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Response body from the collector. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorResponse {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub id: Option<i64>,
}

/// Attempt counter for a single send-interval tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    max_retries: u32,
}

impl RetryState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
        }
    }

    /// Failed attempts so far in the current tick.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count a failed attempt. Returns whether another attempt is allowed.
    ///
    /// At least one attempt is always made, so `max_retries == 0` behaves
    /// like a single attempt with no retry.
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        self.attempts < self.max_retries
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Result of one send-interval tick.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Nothing buffered; the radio was not touched
    Empty,

    /// The link could not be brought up; no attempt was counted
    LinkUnavailable(ConnectionError),

    /// The collector acknowledged `readings` readings
    Delivered { readings: usize, attempts: u32 },

    /// The tick was given up; the buffer is unchanged
    Abandoned { attempts: u32, error: DeliveryError },
}

/// Statistics about delivery operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Total number of batches acknowledged by the collector
    pub batches_delivered: u64,

    /// Total number of readings acknowledged by the collector
    pub readings_delivered: u64,

    /// Total number of failed send attempts
    pub failed_attempts: u64,

    /// Ticks given up after a hard failure or exhausted retries
    pub ticks_abandoned: u64,

    /// Ticks skipped because the link was down
    pub link_unavailable: u64,
}

pub struct DeliveryPipeline<T> {
    transport: T,
    identity: DeviceIdentity,
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    retry_delay: Duration,
    max_batch_size: usize,
    retry: RetryState,
    in_flight: bool,
    stats: DeliveryStats,
}

impl<T: Transport> DeliveryPipeline<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            identity: config.identity.clone(),
            url: config.server.url.clone(),
            connect_timeout: config.network.connect_timeout,
            request_timeout: config.delivery.request_timeout,
            retry_delay: config.delivery.retry_delay,
            max_batch_size: config.delivery.max_batch_size,
            retry: RetryState::new(config.delivery.max_retries),
            in_flight: false,
            stats: DeliveryStats::default(),
        }
    }

    /// Run one send-interval tick against `buffer`.
    pub async fn run_tick<R: Radio>(
        &mut self,
        link: &mut ConnectivityManager<R>,
        buffer: &mut LocalBuffer,
    ) -> DeliveryOutcome {
        self.retry.reset();

        if buffer.is_empty() {
            debug!("Nothing buffered, skipping delivery");
            return DeliveryOutcome::Empty;
        }

        self.in_flight = true;
        let outcome = self.deliver(link, buffer).await;
        self.in_flight = false;
        self.retry.reset();

        outcome
    }

    async fn deliver<R: Radio>(
        &mut self,
        link: &mut ConnectivityManager<R>,
        buffer: &mut LocalBuffer,
    ) -> DeliveryOutcome {
        match link.ensure_connected(self.connect_timeout).await {
            ConnectionState::Connected => {}
            state => {
                let reason = match state {
                    ConnectionState::Failed(e) => e,
                    _ => ConnectionError::Timeout,
                };
                self.stats.link_unavailable += 1;
                info!(
                    error = %reason,
                    buffered = buffer.len(),
                    "Link unavailable, delivery postponed to next send interval"
                );
                return DeliveryOutcome::LinkUnavailable(reason);
            }
        }

        let request = match self.build_request(buffer) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Failed to encode delivery payload");
                self.stats.ticks_abandoned += 1;
                return DeliveryOutcome::Abandoned {
                    attempts: 0,
                    error: DeliveryError::TransportFailure(format!("payload encoding: {}", e)),
                };
            }
        };

        loop {
            let attempt = self.retry.attempts() + 1;
            debug!(
                url = %request.url,
                batch_id = %request.batch_id,
                readings = request.readings,
                attempt = attempt,
                "Sending batch"
            );

            let result = self.transport.send(&request, self.request_timeout).await;
            match interpret(result) {
                Ok(response) => {
                    let removed = buffer.evict_prefix(request.readings);
                    self.stats.batches_delivered += 1;
                    self.stats.readings_delivered += removed as u64;
                    info!(
                        readings = removed,
                        attempts = attempt,
                        batch_id = %request.batch_id,
                        collector_status = %response.status,
                        record_id = ?response.id,
                        remaining = buffer.len(),
                        "Batch delivered"
                    );
                    return DeliveryOutcome::Delivered {
                        readings: removed,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    self.stats.failed_attempts += 1;
                    let retry_allowed = self.retry.record_failure();

                    if e.is_retryable() && retry_allowed {
                        warn!(
                            error = %e,
                            attempt = attempt,
                            max_retries = self.retry.max_retries,
                            delay_ms = self.retry_delay.as_millis() as u64,
                            "Delivery failed, will retry"
                        );
                        sleep(self.retry_delay).await;
                        continue;
                    }

                    error!(
                        error = %e,
                        attempts = attempt,
                        retryable = e.is_retryable(),
                        buffered = buffer.len(),
                        "Delivery abandoned for this send interval"
                    );
                    self.stats.ticks_abandoned += 1;
                    return DeliveryOutcome::Abandoned {
                        attempts: attempt,
                        error: e,
                    };
                }
            }
        }
    }

    fn build_request(&self, buffer: &LocalBuffer) -> Result<DeliveryRequest, serde_json::Error> {
        let batch = buffer.peek_batch(self.max_batch_size);
        let body = DeliveryPayload::new(&self.identity, &batch).to_json()?;

        Ok(DeliveryRequest {
            url: self.url.clone(),
            api_key: self.identity.api_key.clone(),
            user_agent: self.identity.user_agent.clone(),
            batch_id: batch.batch_id(),
            readings: batch.len(),
            body,
        })
    }

    /// False only while a tick is running.
    pub fn is_idle(&self) -> bool {
        !self.in_flight
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Map a transport result onto acknowledgment or a delivery error.
fn interpret(
    result: Result<TransportResponse, TransportError>,
) -> Result<CollectorResponse, DeliveryError> {
    let response = result?;
    match response.status {
        200..=299 => Ok(serde_json::from_str(&response.body).unwrap_or_default()),
        401 | 403 => Err(DeliveryError::AuthRejected {
            status: response.status,
        }),
        status => Err(DeliveryError::TransportFailure(format!(
            "collector returned status {}",
            status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertFlags;
    use crate::reading::Reading;
    use crate::testing::{ScriptedRadio, ScriptedTransport};
    use tokio::time::Instant;

    fn config() -> Config {
        Config::default()
    }

    fn buffer_with(n: u64) -> LocalBuffer {
        let mut buffer = LocalBuffer::new(100);
        for ts in 1..=n {
            buffer.push(Reading::new(ts * 10_000, 20.0 + ts as f32, 50.0, AlertFlags::default()));
        }
        buffer
    }

    fn snapshot(buffer: &LocalBuffer) -> Vec<Reading> {
        buffer.iter().cloned().collect()
    }

    fn link() -> ConnectivityManager<ScriptedRadio> {
        ConnectivityManager::new(ScriptedRadio::connecting_after(Duration::ZERO), &config().network)
    }

    fn body_timestamps(request: &DeliveryRequest) -> Vec<u64> {
        let json: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        json["readings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["timestamp"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_removes_exactly_the_batch() {
        let mut config = config();
        config.delivery.max_batch_size = 3;
        let mut pipeline = DeliveryPipeline::new(ScriptedTransport::always(200), &config);
        let mut link = link();
        let mut buffer = buffer_with(5);
        let before = snapshot(&buffer);

        let outcome = pipeline.run_tick(&mut link, &mut buffer).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                readings: 3,
                attempts: 1
            }
        );
        assert_eq!(snapshot(&buffer), before[3..].to_vec());

        let requests = pipeline.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(body_timestamps(&requests[0].1), vec![10_000, 20_000, 30_000]);
        assert_eq!(pipeline.stats().readings_delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_identity() {
        let config = config();
        let mut pipeline = DeliveryPipeline::new(ScriptedTransport::always(201), &config);
        let mut buffer = buffer_with(1);

        pipeline.run_tick(&mut link(), &mut buffer).await;

        let requests = pipeline.transport().requests();
        let request = &requests[0].1;
        assert_eq!(request.url, config.server.url);
        assert_eq!(request.api_key, config.identity.api_key);
        assert_eq!(request.user_agent, "ESP8266-DHT22/1.0");
        assert_eq!(request.readings, 1);

        let json: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(json["device_id"], "ESP8266_001");
        assert_eq!(json["firmware_version"], "1.0.0");
        assert_eq!(json["batch_id"], request.batch_id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_buffer_untouched() {
        let config = config();
        let mut pipeline = DeliveryPipeline::new(ScriptedTransport::always(500), &config);
        let mut link = link();
        let mut buffer = buffer_with(4);
        let before = snapshot(&buffer);

        let outcome = pipeline.run_tick(&mut link, &mut buffer).await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::Abandoned {
                attempts: 3,
                error: DeliveryError::TransportFailure(_)
            }
        ));
        assert_eq!(snapshot(&buffer), before);
        assert_eq!(pipeline.retry_state().attempts(), 0);

        let requests = pipeline.transport().requests();
        assert_eq!(requests.len(), 3);
        for pair in requests.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, config.delivery.retry_delay);
            // Same batch, byte for byte
            assert_eq!(pair[0].1, pair[1].1);
        }
        assert_eq!(pipeline.stats().failed_attempts, 3);
        assert_eq!(pipeline.stats().ticks_abandoned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let mut pipeline = DeliveryPipeline::new(
            ScriptedTransport::new(vec![
                Err(TransportError::Timeout),
                Ok(TransportResponse {
                    status: 200,
                    body: r#"{"status": "success", "id": 42}"#.to_string(),
                }),
            ]),
            &config(),
        );
        let mut buffer = buffer_with(2);

        let outcome = pipeline.run_tick(&mut link(), &mut buffer).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                readings: 2,
                attempts: 2
            }
        );
        assert!(buffer.is_empty());

        let requests = pipeline.transport().requests();
        assert_eq!(requests[0].1.batch_id, requests[1].1.batch_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_failure_counts_no_attempt() {
        let mut config = config();
        config.network.connect_timeout = Duration::from_secs(2);
        let mut pipeline = DeliveryPipeline::new(ScriptedTransport::always(200), &config);
        let mut link =
            ConnectivityManager::new(ScriptedRadio::never_connects(), &config.network);
        let mut buffer = buffer_with(3);
        let before = snapshot(&buffer);

        let outcome = pipeline.run_tick(&mut link, &mut buffer).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::LinkUnavailable(ConnectionError::Timeout)
        );
        assert!(pipeline.transport().requests().is_empty());
        assert_eq!(snapshot(&buffer), before);
        assert_eq!(pipeline.stats().failed_attempts, 0);
        assert_eq!(pipeline.stats().link_unavailable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_is_retried_until_exhausted() {
        let config = config();
        let mut pipeline = DeliveryPipeline::new(ScriptedTransport::always(401), &config);
        let mut buffer = buffer_with(2);

        let outcome = pipeline.run_tick(&mut link(), &mut buffer).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Abandoned {
                attempts: 3,
                error: DeliveryError::AuthRejected { status: 401 }
            }
        );
        assert_eq!(buffer.len(), 2);
        assert_eq!(pipeline.retry_state().attempts(), 0);

        let requests = pipeline.transport().requests();
        assert_eq!(requests.len(), 3);
        for pair in requests.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, config.delivery.retry_delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_then_success() {
        let mut pipeline = DeliveryPipeline::new(
            ScriptedTransport::new(vec![Ok(TransportResponse {
                status: 403,
                body: String::new(),
            })]),
            &config(),
        );
        let mut buffer = buffer_with(2);

        let outcome = pipeline.run_tick(&mut link(), &mut buffer).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                readings: 2,
                attempts: 2
            }
        );
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_certificate_mismatch_is_hard_failure() {
        let mut pipeline = DeliveryPipeline::new(
            ScriptedTransport::new(vec![Err(TransportError::CertificateMismatch)]),
            &config(),
        );
        let mut buffer = buffer_with(2);

        let outcome = pipeline.run_tick(&mut link(), &mut buffer).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Abandoned {
                attempts: 1,
                error: DeliveryError::CertificateMismatch
            }
        );
        assert_eq!(pipeline.transport().requests().len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_buffer_skips_radio() {
        let mut pipeline = DeliveryPipeline::new(ScriptedTransport::always(200), &config());
        let mut link = link();
        let mut buffer = LocalBuffer::new(10);

        let outcome = pipeline.run_tick(&mut link, &mut buffer).await;
        assert_eq!(outcome, DeliveryOutcome::Empty);
        assert_eq!(link.radio().connect_calls(), 0);
        assert!(pipeline.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_single_attempt() {
        let mut config = config();
        config.delivery.max_retries = 0;
        let mut pipeline = DeliveryPipeline::new(ScriptedTransport::always(503), &config);
        let mut buffer = buffer_with(1);
        let start = Instant::now();

        let outcome = pipeline.run_tick(&mut link(), &mut buffer).await;
        assert!(matches!(outcome, DeliveryOutcome::Abandoned { attempts: 1, .. }));
        assert_eq!(pipeline.transport().requests().len(), 1);
        assert!(start.elapsed() < config.delivery.retry_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_between_ticks() {
        let mut pipeline = DeliveryPipeline::new(
            ScriptedTransport::new(vec![
                Err(TransportError::Timeout),
                Err(TransportError::Timeout),
                Err(TransportError::Timeout),
                Err(TransportError::Timeout),
                Ok(TransportResponse {
                    status: 200,
                    body: String::new(),
                }),
            ]),
            &config(),
        );
        let mut link = link();
        let mut buffer = buffer_with(2);

        let first = pipeline.run_tick(&mut link, &mut buffer).await;
        assert!(matches!(first, DeliveryOutcome::Abandoned { attempts: 3, .. }));
        assert_eq!(pipeline.retry_state().attempts(), 0);

        // A fresh tick gets the full retry budget again
        let second = pipeline.run_tick(&mut link, &mut buffer).await;
        assert_eq!(
            second,
            DeliveryOutcome::Delivered {
                readings: 2,
                attempts: 2
            }
        );
    }

    #[test]
    fn test_retry_state() {
        let mut retry = RetryState::new(3);
        assert!(retry.record_failure());
        assert!(retry.record_failure());
        assert!(!retry.record_failure());
        assert_eq!(retry.attempts(), 3);
        retry.reset();
        assert_eq!(retry.attempts(), 0);
    }

    #[test]
    fn test_interpret_status_codes() {
        let response = |status: u16, body: &str| {
            Ok(TransportResponse {
                status,
                body: body.to_string(),
            })
        };

        let ack = interpret(response(200, r#"{"status":"success","message":"ok","id":7}"#)).unwrap();
        assert_eq!(ack.status, "success");
        assert_eq!(ack.id, Some(7));

        // Non-JSON bodies still acknowledge on 2xx
        assert!(interpret(response(204, "")).is_ok());

        assert_eq!(
            interpret(response(403, "")).unwrap_err(),
            DeliveryError::AuthRejected { status: 403 }
        );
        assert!(interpret(response(401, "")).unwrap_err().is_retryable());
        assert!(interpret(response(400, "")).unwrap_err().is_retryable());
        assert!(interpret(Err(TransportError::Connection("reset".to_string())))
            .unwrap_err()
            .is_retryable());
    }

    #[test]
    fn test_request_debug_redacts_key() {
        let request = DeliveryRequest {
            url: "http://collector".to_string(),
            api_key: "secret".to_string(),
            user_agent: "ua".to_string(),
            batch_id: Uuid::new_v4(),
            readings: 0,
            body: Vec::new(),
        };
        assert!(!format!("{:?}", request).contains("secret"));
    }
}
