//! Service configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.

use crate::error::ConfigError;
use crate::types::JobKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Read and parse a TOML file into any config shape
///
/// # Errors
/// Returns error if the file cannot be read or does not match `T`
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&source)?)
}

/// Channel label that maps to the `default` execution channel
pub const DEFAULT_CHANNEL_ALIAS: &str = "Carrier default config";

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Log service push URL, also the base of live-log websocket URLs
    pub loki_url: String,
    /// Job kind used when a test is run through the service
    pub job_kind: JobKind,
    /// Scan location label that maps to the `default` channel
    pub default_channel_alias: String,
    /// Capability call deadlines
    pub timeouts: TimeoutConfig,
    /// Container images
    pub images: ImageConfig,
}

impl ServiceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document
    ///
    /// # Errors
    /// Returns error if the document does not match the config schema
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    /// With log service URL
    #[inline]
    #[must_use]
    pub fn with_loki_url(mut self, url: impl Into<String>) -> Self {
        self.loki_url = url.into();
        self
    }

    /// With job kind for service-triggered runs
    #[inline]
    #[must_use]
    pub fn with_job_kind(mut self, kind: JobKind) -> Self {
        self.job_kind = kind;
        self
    }

    /// With capability deadlines
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            loki_url: "http://loki:3100/loki/api/v1/push".to_string(),
            job_kind: JobKind::Sast,
            default_channel_alias: DEFAULT_CHANNEL_ALIAS.to_string(),
            timeouts: TimeoutConfig::default(),
            images: ImageConfig::default(),
        }
    }
}

/// Capability call deadlines, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-integration config fragment requests
    pub fragment_secs: u64,
    /// Schedule creation and reconciliation deletes
    pub schedule_secs: u64,
    /// Schedule record loading for list views
    pub schedule_load_secs: u64,
    /// Project lookups
    pub project_lookup_secs: u64,
    /// Task dispatch
    pub run_secs: u64,
}

impl TimeoutConfig {
    /// Fragment request deadline
    #[inline]
    #[must_use]
    pub fn fragment(&self) -> Duration {
        Duration::from_secs(self.fragment_secs)
    }

    /// Schedule create/delete deadline
    #[inline]
    #[must_use]
    pub fn schedule(&self) -> Duration {
        Duration::from_secs(self.schedule_secs)
    }

    /// Schedule load deadline
    #[inline]
    #[must_use]
    pub fn schedule_load(&self) -> Duration {
        Duration::from_secs(self.schedule_load_secs)
    }

    /// Project lookup deadline
    #[inline]
    #[must_use]
    pub fn project_lookup(&self) -> Duration {
        Duration::from_secs(self.project_lookup_secs)
    }

    /// Task dispatch deadline
    #[inline]
    #[must_use]
    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fragment_secs: 2,
            schedule_secs: 2,
            schedule_load_secs: 2,
            project_lookup_secs: 2,
            run_secs: 3,
        }
    }
}

/// Container images used by execution documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Image running SAST jobs
    pub sast: String,
    /// Image running DAST jobs
    pub dast: String,
    /// Control tower image (without tag)
    pub control_tower: String,
    /// Control tower release tag
    pub release: String,
}

impl ImageConfig {
    /// Image reference for a job kind
    #[must_use]
    pub fn for_kind(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Sast => &self.sast,
            JobKind::Dast => &self.dast,
        }
    }

    /// Tagged control tower image reference
    #[must_use]
    pub fn control_tower_ref(&self) -> String {
        format!("{}:{}", self.control_tower, self.release)
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            sast: "getcarrier/sast:latest".to_string(),
            dast: "getcarrier/dast:latest".to_string(),
            control_tower: "getcarrier/control_tower".to_string(),
            release: "latest".to_string(),
        }
    }
}
