//! Telemetry channel contract and bundled implementations.
//!
//! The channel is an opaque publish sink: the hub hands it one batch per
//! tick and forgets the batch whether the send succeeded or not. Retry and
//! backoff policy belong to the channel collaborator, never to the publish
//! cycle. A [`ChannelFactory`] opens one channel per hub generation so a
//! reconciled identity always gets a fresh channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::collector::SensorData;
use crate::config::Parameters;
use crate::keys::KeyMaterial;

/// Errors from the telemetry channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport-level send failure (connect, timeout, i/o).
    #[error("failed to send batch: {0}")]
    Send(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("telemetry endpoint returned status {0}")]
    Status(u16),

    /// The channel could not be opened.
    #[error("channel configuration error: {0}")]
    Config(String),
}

/// One publish cycle's readings, addressed from a single device.
///
/// The id exists only for log correlation; the bridge does not deduplicate.
#[derive(Debug, Clone, Serialize)]
pub struct PublishBatch {
    pub id: Uuid,
    pub device_id: String,
    pub readings: Vec<SensorData>,
}

impl PublishBatch {
    pub fn new(device_id: impl Into<String>, readings: Vec<SensorData>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            readings,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Opaque publish sink for sensor batches.
#[async_trait]
pub trait TelemetryChannel: Send + Sync {
    /// Send one batch. Failure is reported, never retried here.
    async fn send(&self, batch: &PublishBatch) -> Result<(), ChannelError>;

    /// Release the channel. Called exactly once per hub generation, when the
    /// publish cycle exits.
    async fn close(&self);
}

/// Opens a channel for a given identity; one open per hub generation.
pub trait ChannelFactory: Send + Sync {
    fn open(
        &self,
        params: &Parameters,
        key: &KeyMaterial,
    ) -> Result<Box<dyn TelemetryChannel>, ChannelError>;
}

// =============================================================================
// HTTP bridge
// =============================================================================

/// Channel posting batches as JSON to an HTTP bridge.
///
/// The device path mirrors the cloud registry hierarchy so one bridge can
/// fan out many registries. Authentication against the cloud (JWT minting
/// from the key material) is the bridge's job.
pub struct HttpBridgeChannel {
    client: reqwest::Client,
    url: String,
}

impl HttpBridgeChannel {
    /// Open a channel for one identity.
    ///
    /// # Errors
    /// Returns `ChannelError::Config` if the HTTP client cannot be built.
    pub fn open(
        base_url: &str,
        params: &Parameters,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Config(format!("failed to build HTTP client: {e}")))?;

        let url = format!(
            "{}/projects/{}/locations/{}/registries/{}/devices/{}:publish",
            base_url.trim_end_matches('/'),
            params.project_id,
            params.cloud_region,
            params.registry_id,
            params.device_id,
        );

        Ok(Self { client, url })
    }

    /// Target URL this channel publishes to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TelemetryChannel for HttpBridgeChannel {
    async fn send(&self, batch: &PublishBatch) -> Result<(), ChannelError> {
        let response = self.client.post(&self.url).json(batch).send().await?;
        if !response.status().is_success() {
            return Err(ChannelError::Status(response.status().as_u16()));
        }
        tracing::debug!(
            batch_id = %batch.id,
            readings = batch.readings.len(),
            "Batch published"
        );
        Ok(())
    }

    async fn close(&self) {
        // reqwest clients release their connections on drop.
        tracing::debug!(url = %self.url, "Telemetry channel closed");
    }
}

/// Factory for [`HttpBridgeChannel`], one per agent process.
#[derive(Debug, Clone)]
pub struct HttpBridgeFactory {
    base_url: String,
    timeout: Duration,
}

impl HttpBridgeFactory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

impl ChannelFactory for HttpBridgeFactory {
    fn open(
        &self,
        params: &Parameters,
        _key: &KeyMaterial,
    ) -> Result<Box<dyn TelemetryChannel>, ChannelError> {
        let channel = HttpBridgeChannel::open(&self.base_url, params, self.timeout)?;
        tracing::info!(url = %channel.url(), "Telemetry channel opened");
        Ok(Box::new(channel))
    }
}

// =============================================================================
// Unmanaged mode
// =============================================================================

/// Channel that logs batches instead of sending them.
///
/// Used when no bridge URL is configured, so the collect cycle can be
/// observed on a device that is not yet cloud-connected.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl TelemetryChannel for LogChannel {
    async fn send(&self, batch: &PublishBatch) -> Result<(), ChannelError> {
        tracing::info!(
            batch_id = %batch.id,
            device_id = %batch.device_id,
            readings = batch.readings.len(),
            "Batch collected (unmanaged mode, not sent)"
        );
        Ok(())
    }

    async fn close(&self) {}
}

/// Factory for [`LogChannel`].
#[derive(Debug, Clone, Default)]
pub struct LogChannelFactory;

impl ChannelFactory for LogChannelFactory {
    fn open(
        &self,
        params: &Parameters,
        _key: &KeyMaterial,
    ) -> Result<Box<dyn TelemetryChannel>, ChannelError> {
        tracing::warn!(
            device_id = %params.device_id,
            "No bridge URL configured; running in unmanaged mode"
        );
        Ok(Box::new(LogChannel))
    }
}
