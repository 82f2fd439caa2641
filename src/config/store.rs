//! Persisted configuration store.
//!
//! The agent keeps the last accepted identity under the fixed
//! `cloud_iot_config` namespace so a restart comes back up with the same
//! cloud identity without waiting for the next provisioning fetch. The store
//! loads leniently (a partial document is still a usable baseline) and saves
//! only complete, validated [`Parameters`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::{ConfigError, Parameters, PartialParameters};

/// Fixed namespace for the persisted identity document.
pub const CONFIG_NAMESPACE: &str = "cloud_iot_config";

/// Key-value persistence for the active cloud identity.
pub trait ConfigStore: Send + Sync {
    /// Load the persisted baseline, if any.
    fn load(&self) -> Result<Option<PartialParameters>, ConfigError>;

    /// Persist a newly accepted identity, replacing the previous one.
    fn save(&self, params: &Parameters) -> Result<(), ConfigError>;
}

/// JSON-file backed store at `<data_dir>/cloud_iot_config.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at the given data directory.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{CONFIG_NAMESPACE}.json")),
        }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<Option<PartialParameters>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let partial: PartialParameters = serde_json::from_str(&content)?;
        Ok(Some(partial))
    }

    fn save(&self, params: &Parameters) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(params)?;
        std::fs::write(&self.path, content)?;
        tracing::debug!(path = %self.path.display(), "Persisted cloud identity");
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<PartialParameters>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a baseline.
    pub fn with_baseline(baseline: PartialParameters) -> Self {
        Self {
            inner: Mutex::new(Some(baseline)),
        }
    }

    /// Number of values currently held (0 or 1).
    pub fn is_populated(&self) -> bool {
        self.inner.lock().expect("store lock poisoned").is_some()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Option<PartialParameters>, ConfigError> {
        Ok(self.inner.lock().expect("store lock poisoned").clone())
    }

    fn save(&self, params: &Parameters) -> Result<(), ConfigError> {
        *self.inner.lock().expect("store lock poisoned") = Some(PartialParameters::from(params));
        Ok(())
    }
}
