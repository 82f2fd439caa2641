//! Configuration Layer
//!
//! Two distinct concerns live here:
//!
//! - [`Parameters`]: the reconciled cloud identity (project, region,
//!   registry, device, key algorithm) with its change-detection
//!   [fingerprint](Parameters::fingerprint), plus the [`ConfigStore`]
//!   persistence behind the fixed `cloud_iot_config` namespace.
//! - [`AgentSettings`]: process-local runtime settings (directories,
//!   periods, timeouts) loaded once at startup.

mod app;
mod params;
mod store;

pub use app::{
    AgentSettings, DEFAULT_POLL_INTERVAL, DEFAULT_PUBLISH_INTERVAL, DEFAULT_READ_BUDGET,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use params::{
    ConfigError, KeyAlgorithm, Parameters, PartialParameters, SUPPORTED_KEY_ALGORITHMS,
};
pub use store::{ConfigStore, JsonFileStore, MemoryStore, CONFIG_NAMESPACE};
