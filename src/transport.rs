//! HTTP transport for collector deliveries.
//!
//! A single [`reqwest::Client`] is built at startup and reused for every
//! request so the connection (and TLS session) can be kept alive between
//! send intervals. When SSL is enabled the client runs on a rustls
//! configuration that accepts only the pinned collector certificate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tracing::debug;

use crate::config::ServerConfig;
use crate::delivery::{DeliveryRequest, Transport, TransportResponse};
use crate::error::TransportError;
use crate::tls::pinned_client_config;

/// Header carrying the device API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// [`Transport`] backed by reqwest.
pub struct HttpTransport {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Raised by the pinned verifier when the collector presents another certificate
    pin_mismatch: Option<Arc<AtomicBool>>,
}

impl HttpTransport {
    /// Build the transport for `server`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Other` if SSL is enabled without a
    /// fingerprint or the HTTP client cannot be built.
    pub fn new(server: &ServerConfig, request_timeout: Duration) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(1)
            .pool_idle_timeout(Duration::from_secs(90));

        let mut pin_mismatch = None;
        if server.enable_ssl {
            let fingerprint = server.fingerprint.ok_or_else(|| {
                TransportError::Other("SSL enabled without a certificate fingerprint".to_string())
            })?;
            let (tls, mismatch) = pinned_client_config(fingerprint)
                .map_err(|e| TransportError::Other(format!("TLS setup failed: {}", e)))?;
            builder = builder.use_preconfigured_tls(tls);
            pin_mismatch = Some(mismatch);
            debug!(fingerprint = %fingerprint, "Certificate pinning enabled");
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            client,
            pin_mismatch,
        })
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_mismatch.is_some()
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        let mismatch = self
            .pin_mismatch
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst));

        classify_error(&err, mismatch)
    }
}

/// A raised pin flag wins over whatever handshake error reqwest reports.
fn classify_error(err: &reqwest::Error, pin_mismatch: bool) -> TransportError {
    if pin_mismatch {
        TransportError::CertificateMismatch
    } else if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &DeliveryRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        if let Some(flag) = &self.pin_mismatch {
            flag.store(false, Ordering::SeqCst);
        }

        let response = self
            .client
            .post(&request.url)
            .timeout(timeout)
            .header(API_KEY_HEADER, request.api_key.as_str())
            .header(USER_AGENT, request.user_agent.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(status = status, error = %e, "Failed to read collector response body");
                String::new()
            }
        };

        debug!(
            status = status,
            body_bytes = body.len(),
            batch_id = %request.batch_id,
            "Collector responded"
        );

        Ok(TransportResponse { status, body })
    }
}
