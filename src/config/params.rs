//! Cloud identity parameters and change-detection fingerprint.
//!
//! A [`Parameters`] value is the complete identity of one device against the
//! cloud registry: project, region, registry, device and key algorithm. It is
//! immutable once built; reconciliation replaces the whole value rather than
//! mutating fields. [`PartialParameters`] is the merge source used for the
//! persisted baseline, launch-time overrides and freshly fetched JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key algorithms accepted by the cloud registry (case-sensitive wire names).
pub const SUPPORTED_KEY_ALGORITHMS: &[&str] = &["RS256", "ES256"];

/// Errors from parsing, merging or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required fields are missing or empty.
    #[error("incomplete configuration, missing fields: {}", .0.join(", "))]
    Incomplete(Vec<String>),

    /// Malformed JSON in a discovery response or persisted document.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Unknown `key_algorithm` value.
    #[error("unsupported key algorithm '{0}', expected one of RS256, ES256")]
    InvalidAlgorithm(String),

    /// Failed to read or write a configuration file.
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML in the agent settings file.
    #[error("failed to parse YAML settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A settings value is out of range or inconsistent.
    #[error("settings validation error: {0}")]
    Validation(String),
}

/// Signature algorithm used for device key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "ES256")]
    Es256,
}

impl KeyAlgorithm {
    /// Wire name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Es256 => "ES256",
        }
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::Rs256),
            "ES256" => Ok(Self::Es256),
            other => Err(ConfigError::InvalidAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete, validated cloud identity configuration.
///
/// All five fields are non-empty by construction; build one through
/// [`Parameters::parse`] or [`PartialParameters::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    pub project_id: String,
    pub cloud_region: String,
    pub registry_id: String,
    pub device_id: String,
    pub key_algorithm: KeyAlgorithm,
}

impl Parameters {
    /// Parse a discovery response body into validated parameters.
    ///
    /// # Errors
    /// - [`ConfigError::Parse`] for malformed JSON
    /// - [`ConfigError::Incomplete`] for missing or empty required keys
    /// - [`ConfigError::InvalidAlgorithm`] for an unknown `key_algorithm`
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let partial: PartialParameters = serde_json::from_str(raw)?;
        partial.build()
    }

    /// Canonical change-detection fingerprint.
    ///
    /// Field order is fixed here, so two semantically identical parameter
    /// sets produce the same fingerprint regardless of how their source
    /// representation ordered its keys.
    pub fn fingerprint(&self) -> String {
        format!(
            "project_id={};cloud_region={};registry_id={};device_id={};key_algorithm={}",
            self.project_id,
            self.cloud_region,
            self.registry_id,
            self.device_id,
            self.key_algorithm
        )
    }

    /// Log the active identity at info level with structured fields.
    pub fn log_summary(&self) {
        tracing::info!(
            project_id = %self.project_id,
            cloud_region = %self.cloud_region,
            registry_id = %self.registry_id,
            device_id = %self.device_id,
            key_algorithm = %self.key_algorithm,
            "Active cloud identity"
        );
    }
}

/// Partially specified parameters, used as a merge source.
///
/// Empty strings are treated the same as absent values everywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialParameters {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub cloud_region: Option<String>,
    #[serde(default)]
    pub registry_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub key_algorithm: Option<String>,
}

fn present(field: &Option<String>) -> Option<&String> {
    field.as_ref().filter(|v| !v.is_empty())
}

impl PartialParameters {
    /// Merge another source over this one; the override wins field-by-field
    /// wherever it carries a non-empty value.
    pub fn merge(mut self, overrides: PartialParameters) -> Self {
        if present(&overrides.project_id).is_some() {
            self.project_id = overrides.project_id;
        }
        if present(&overrides.cloud_region).is_some() {
            self.cloud_region = overrides.cloud_region;
        }
        if present(&overrides.registry_id).is_some() {
            self.registry_id = overrides.registry_id;
        }
        if present(&overrides.device_id).is_some() {
            self.device_id = overrides.device_id;
        }
        if present(&overrides.key_algorithm).is_some() {
            self.key_algorithm = overrides.key_algorithm;
        }
        self
    }

    /// True if no field carries a value.
    pub fn is_empty(&self) -> bool {
        present(&self.project_id).is_none()
            && present(&self.cloud_region).is_none()
            && present(&self.registry_id).is_none()
            && present(&self.device_id).is_none()
            && present(&self.key_algorithm).is_none()
    }

    /// Validate into a complete [`Parameters`] value.
    ///
    /// # Errors
    /// Returns [`ConfigError::Incomplete`] naming every missing field rather
    /// than failing on the first, so the log guidance lists everything the
    /// operator still has to supply.
    pub fn build(self) -> Result<Parameters, ConfigError> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("project_id", &self.project_id),
            ("cloud_region", &self.cloud_region),
            ("registry_id", &self.registry_id),
            ("device_id", &self.device_id),
            ("key_algorithm", &self.key_algorithm),
        ] {
            if present(value).is_none() {
                missing.push(name.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::Incomplete(missing));
        }

        // All fields checked present above.
        let algorithm: KeyAlgorithm = self.key_algorithm.as_deref().unwrap_or_default().parse()?;
        Ok(Parameters {
            project_id: self.project_id.unwrap_or_default(),
            cloud_region: self.cloud_region.unwrap_or_default(),
            registry_id: self.registry_id.unwrap_or_default(),
            device_id: self.device_id.unwrap_or_default(),
            key_algorithm: algorithm,
        })
    }
}

impl From<&Parameters> for PartialParameters {
    fn from(params: &Parameters) -> Self {
        Self {
            project_id: Some(params.project_id.clone()),
            cloud_region: Some(params.cloud_region.clone()),
            registry_id: Some(params.registry_id.clone()),
            device_id: Some(params.device_id.clone()),
            key_algorithm: Some(params.key_algorithm.as_str().to_string()),
        }
    }
}
