//! Error types for sectest core
//!
//! Capability absence is never an error here: it is recovered where it
//! happens. What remains:
//! - malformed caller input
//! - persistence failures
//! - secret resolution and document serialization failures

use crate::types::{ProjectId, TestId};
use sectest_bus::BusError;
use std::path::PathBuf;

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Row to update does not exist
    #[error("test {0} not found")]
    NotFound(TestId),

    /// Attempt to change a test uid
    #[error("test {id} uid is immutable")]
    ImmutableUid {
        /// Test whose uid was changed
        id: TestId,
    },

    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Secret resolution failures
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// Secret backend could not be reached
    #[error("secret backend unavailable: {0}")]
    Backend(String),
}

/// Execution document build failures
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Infrastructure credential could not be resolved
    #[error("secret resolution failed: {0}")]
    Secret(#[from] SecretError),

    /// Document part could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the config schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One rejected field of a create request
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    /// Field name
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl FieldError {
    /// Create field error
    #[inline]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main service error type
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input, rejected before any mutation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Create request failed validation
    #[error("validation failed: {} field(s) rejected", .0.len())]
    Validation(Vec<FieldError>),

    /// Project lookup reported no such project
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    /// Test lookup found nothing
    #[error("test {0} not found")]
    TestNotFound(String),

    /// Log stream parameters missing
    #[error("log stream not found")]
    LogStreamNotFound,

    /// A capability the operation cannot proceed without is absent
    #[error("capability unavailable: {0}")]
    Unavailable(#[source] BusError),

    /// Persistence failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Execution document could not be built
    #[error("build error: {0}")]
    Build(#[from] BuildError),
}

impl ServiceError {
    /// HTTP-style status code for the embedding transport
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::Validation(_) => 400,
            Self::ProjectNotFound(_) | Self::TestNotFound(_) | Self::LogStreamNotFound => 404,
            Self::Store(StoreError::Conflict(_) | StoreError::ImmutableUid { .. }) => 409,
            Self::Store(StoreError::NotFound(_)) => 404,
            Self::Unavailable(_) => 503,
            Self::Store(_) | Self::Build(_) => 500,
        }
    }

    /// Check if the caller sent something wrong
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_status_codes() {
        assert_eq!(ServiceError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(ServiceError::ProjectNotFound(ProjectId(1)).status_code(), 404);
        assert_eq!(
            ServiceError::Store(StoreError::Conflict("uid".into())).status_code(),
            409
        );
        assert_eq!(
            ServiceError::Store(StoreError::Backend("io".into())).status_code(),
            500
        );
        let absent = BusError::Absent {
            capability: "run-task".into(),
        };
        assert_eq!(ServiceError::Unavailable(absent).status_code(), 503);
    }

    #[test]
    fn client_errors_classified() {
        assert!(ServiceError::Validation(vec![FieldError::new("name", "required")]).is_client_error());
        assert!(!ServiceError::Build(BuildError::Secret(SecretError::Backend("x".into()))).is_client_error());
    }
}
