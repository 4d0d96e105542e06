//! Error types for capability calls

use std::time::Duration;

/// Failure of a single capability call
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Nothing is registered under the requested name
    #[error("no provider registered for capability `{capability}`")]
    Absent {
        /// Requested capability name
        capability: String,
    },

    /// The provider did not answer before the deadline
    #[error("capability `{capability}` did not answer within {}ms", .timeout.as_millis())]
    TimedOut {
        /// Requested capability name
        capability: String,
        /// Deadline the call was bounded by
        timeout: Duration,
    },

    /// The provider answered with an error
    #[error("capability `{capability}` failed: {source}")]
    Provider {
        /// Requested capability name
        capability: String,
        /// Error reported by the provider
        #[source]
        source: ProviderError,
    },

    /// Payload could not be encoded as JSON
    #[error("cannot encode payload for `{capability}`: {source}")]
    Payload {
        /// Requested capability name
        capability: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Response did not have the expected shape
    #[error("cannot decode response from `{capability}`: {source}")]
    Decode {
        /// Requested capability name
        capability: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

impl BusError {
    /// Check if this is the routine capability-absent signal
    ///
    /// Both "not registered" and "did not answer in time" count as absent.
    #[inline]
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent { .. } | Self::TimedOut { .. })
    }

    /// Name of the capability the failed call addressed
    #[must_use]
    pub fn capability(&self) -> &str {
        match self {
            Self::Absent { capability }
            | Self::TimedOut { capability, .. }
            | Self::Provider { capability, .. }
            | Self::Payload { capability, .. }
            | Self::Decode { capability, .. } => capability,
        }
    }
}

/// Error a provider returns from its handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProviderError(String);

impl ProviderError {
    /// Create provider error from a message
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Error message
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}
