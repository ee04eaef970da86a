//! Best-effort relay of single readings
//!
//! [`Relay::send`] spawns one task per reading that POSTs
//! `{"value": <reading>}` to the metric's endpoint. The caller never waits
//! for the request. Failures are logged and dropped: no retry, no queue, at
//! most one delivery attempt per reading.

pub mod memory;

pub use memory::MemoryTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::metric::{MetricKind, Reading};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Payload type does not match {0}")]
    PayloadMismatch(MetricKind),

    #[error("Non-finite value for {0}")]
    NonFinite(MetricKind),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Wire body of a relayed reading.
#[derive(Debug, Serialize)]
pub struct RelayPayload<'a> {
    pub value: &'a Reading,
}

/// Outbound JSON POST.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<(), RelayError>;
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RelayError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RelayTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<(), RelayError> {
        // `.json()` sets the application/json content type.
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RelayError::Status(status.as_u16()))
        }
    }
}

/// Fire-and-forget sender for metric readings.
#[derive(Clone)]
pub struct Relay {
    base_url: String,
    transport: Arc<dyn RelayTransport>,
}

impl Relay {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn RelayTransport>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint_url(&self, kind: MetricKind) -> String {
        format!("{}{}", self.base_url, kind.endpoint())
    }

    /// Dispatch one reading without waiting for it.
    ///
    /// The returned handle is only useful to tests; dropping it does not
    /// cancel the send.
    pub fn send(&self, kind: MetricKind, reading: Reading) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            match relay.deliver(kind, &reading).await {
                Ok(()) => log::debug!("Successfully sent {} data to server: {}", kind, reading),
                Err(e) => log::warn!("Failed to send {} data to server: {}", kind, e),
            }
        })
    }

    /// Perform the single delivery attempt for one reading.
    pub async fn deliver(&self, kind: MetricKind, reading: &Reading) -> Result<(), RelayError> {
        if reading.payload_kind() != kind.profile().payload {
            return Err(RelayError::PayloadMismatch(kind));
        }
        // serde_json would encode NaN and infinities as null.
        if matches!(reading, Reading::Float(v) if !v.is_finite()) {
            return Err(RelayError::NonFinite(kind));
        }
        let body = serde_json::to_value(RelayPayload { value: reading })
            .map_err(|e| RelayError::Serialization(e.to_string()))?;
        let url = self.endpoint_url(kind);
        log::debug!("Sending {} to {}: {}", kind, url, reading);
        self.transport.post_json(&url, body).await
    }
}
