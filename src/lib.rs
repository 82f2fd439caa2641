//! Sensorhub - Device-side Cloud IoT Agent
//!
//! This crate runs on a device and does two things:
//!
//! - **Provisioning reconciliation**: a background poller fetches the
//!   device's cloud identity from a local provisioning service
//!   (`http://<gateway>:8000/config.json`) and restarts the telemetry hub
//!   only when the configuration actually changed, detected via a canonical
//!   parameter fingerprint.
//! - **Sensor collection**: a hub polls registered [`SensorCollector`]
//!   sources on a fixed period and forwards reading batches to a cloud
//!   telemetry channel.
//!
//! # Architecture
//!
//! - [`config`]: cloud identity [`Parameters`] + persisted store + runtime
//!   settings
//! - [`collector`]: pluggable sensor sources behind one capability contract
//! - [`hub`]: collector registry ownership and the publish cycle
//! - [`provision`]: the reconciliation poller and endpoint resolution
//! - [`telemetry`] / [`keys`]: the external cloud-facing seams
//! - [`agent`]: start/stop entry points wiring it all together
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensorhub::{
//!     Agent, AgentSettings, GatewayResolver, JsonFileStore, FileKeyProvider,
//!     LogChannelFactory, PartialParameters, RandomNumberCollector, SensorRegistry,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = AgentSettings::default();
//! let mut agent = Agent::new(
//!     settings.clone(),
//!     Arc::new(JsonFileStore::new(&settings.data_dir)),
//!     Arc::new(FileKeyProvider::new(settings.keys_dir())),
//!     Arc::new(LogChannelFactory),
//!     Arc::new(GatewayResolver::new()),
//!     Arc::new(|| {
//!         let mut registry = SensorRegistry::new();
//!         registry.register(Box::new(RandomNumberCollector::new()));
//!         registry
//!     }),
//! );
//!
//! agent.start(PartialParameters::default()).await?;
//! // ... until the host decides to shut down
//! agent.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod collector;
pub mod config;
pub mod hub;
pub mod keys;
pub mod provision;
pub mod telemetry;

pub use agent::{Agent, AgentError, RegistryBuilder};
pub use collector::{RandomNumberCollector, SensorCollector, SensorData, SensorRegistry};
pub use config::{
    AgentSettings, ConfigError, ConfigStore, JsonFileStore, KeyAlgorithm, MemoryStore, Parameters,
    PartialParameters,
};
pub use hub::{Hub, HubError};
pub use keys::{FileKeyProvider, KeyMaterial, KeyProvider, SecurityError, StaticKeyProvider};
pub use provision::{
    EndpointResolver, FixedResolver, GatewayResolver, PollOutcome, ProvisionError, ProvisionPoller,
};
pub use telemetry::{
    ChannelError, ChannelFactory, HttpBridgeChannel, HttpBridgeFactory, LogChannel,
    LogChannelFactory, PublishBatch, TelemetryChannel,
};
