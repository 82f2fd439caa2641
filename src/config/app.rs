//! Agent runtime settings.
//!
//! Settings are distinct from the cloud identity [`Parameters`]: identity is
//! reconciled at runtime from the discovery endpoint, while settings are
//! fixed for the life of the process. Loaded from an optional YAML file with
//! CLI/env overrides applied by the binary.
//!
//! [`Parameters`]: crate::config::Parameters

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default provisioning check period (10 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default publish cycle period (5 seconds).
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on discovery fetches and telemetry sends (5 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-collector read budget within one publish tick (2 seconds).
pub const DEFAULT_READ_BUDGET: Duration = Duration::from_secs(2);

fn default_data_dir() -> PathBuf {
    PathBuf::from("sensorhub-data")
}

/// Runtime settings for one agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Directory for the persisted identity document.
    pub data_dir: PathBuf,

    /// Directory searched for device key material (default: `<data_dir>/keys`).
    pub keys_dir: Option<PathBuf>,

    /// Provisioning check period (default: 10s).
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Publish cycle period (default: 5s).
    #[serde(with = "humantime_serde")]
    pub publish_interval: Duration,

    /// Timeout applied to discovery fetches and telemetry sends (default: 5s).
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Per-collector read budget within one publish tick (default: 2s).
    #[serde(with = "humantime_serde")]
    pub read_budget: Duration,

    /// Telemetry bridge base URL. When absent, batches are logged instead of
    /// sent (unmanaged mode).
    pub bridge_url: Option<String>,

    /// Explicit discovery URL, replacing gateway-derived resolution.
    pub discovery_url: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            keys_dir: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            read_budget: DEFAULT_READ_BUDGET,
            bridge_url: None,
            discovery_url: None,
        }
    }
}

impl AgentSettings {
    /// Load settings from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let settings: Self = serde_yaml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Effective key material directory.
    pub fn keys_dir(&self) -> PathBuf {
        self.keys_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }

    /// Validate settings values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("publish_interval", self.publish_interval),
            ("request_timeout", self.request_timeout),
            ("read_budget", self.read_budget),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Validation(format!("{name} must be non-zero")));
            }
        }

        if let Some(ref bridge) = self.bridge_url {
            url::Url::parse(bridge).map_err(|e| {
                ConfigError::Validation(format!("invalid bridge_url '{bridge}': {e}"))
            })?;
        }
        if let Some(ref discovery) = self.discovery_url {
            url::Url::parse(discovery).map_err(|e| {
                ConfigError::Validation(format!("invalid discovery_url '{discovery}': {e}"))
            })?;
        }

        Ok(())
    }
}
