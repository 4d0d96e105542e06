//! Capability registry and dispatch
//!
//! Provides [`CapabilityBus`], a shared name → provider map. Providers may be
//! registered, swapped or removed while calls are in flight; a call resolves
//! its provider once, at call time.

use crate::error::BusError;
use crate::handler::{CapabilityHandler, FnHandler, HandlerResult};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Registry of named capability providers
///
/// Cloning is cheap and every clone sees the same registrations.
#[derive(Clone, Default)]
pub struct CapabilityBus {
    providers: Arc<DashMap<String, Arc<dyn CapabilityHandler>>>,
}

impl CapabilityBus {
    /// Create new empty bus
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one under the same name
    ///
    /// Returns `true` if a provider was replaced.
    pub fn register<H>(&self, capability: impl Into<String>, handler: H) -> bool
    where
        H: CapabilityHandler + 'static,
    {
        let capability = capability.into();
        tracing::debug!(capability = %capability, "registering capability provider");
        self.providers
            .insert(capability, Arc::new(handler))
            .is_some()
    }

    /// Register an async closure as provider
    pub fn register_fn<F, Fut>(&self, capability: impl Into<String>, f: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(capability, FnHandler::new(f))
    }

    /// Remove provider
    #[inline]
    pub fn unregister(&self, capability: &str) -> bool {
        self.providers.remove(capability).is_some()
    }

    /// Check if a provider is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, capability: &str) -> bool {
        self.providers.contains_key(capability)
    }

    /// List registered capability names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Get number of registered providers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if bus has no providers
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Call a capability with a raw JSON payload
    ///
    /// # Errors
    /// - [`BusError::Absent`] if nothing is registered under `capability`
    /// - [`BusError::TimedOut`] if the provider does not answer within `timeout`
    /// - [`BusError::Provider`] if the provider answers with an error
    pub async fn call(
        &self,
        capability: &str,
        timeout: Duration,
        payload: Value,
    ) -> Result<Value, BusError> {
        // No shard lock may be held across the await
        let handler = self
            .providers
            .get(capability)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BusError::Absent {
                capability: capability.to_string(),
            })?;

        tracing::debug!(capability, ?timeout, "calling capability");

        match tokio::time::timeout(timeout, handler.handle(payload)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(BusError::Provider {
                capability: capability.to_string(),
                source,
            }),
            Err(_) => Err(BusError::TimedOut {
                capability: capability.to_string(),
                timeout,
            }),
        }
    }

    /// Call a capability with typed payload and response
    ///
    /// # Errors
    /// Same as [`CapabilityBus::call`], plus [`BusError::Payload`] and
    /// [`BusError::Decode`] for serialization failures.
    pub async fn call_typed<P, R>(
        &self,
        capability: &str,
        timeout: Duration,
        payload: &P,
    ) -> Result<R, BusError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload).map_err(|source| BusError::Payload {
            capability: capability.to_string(),
            source,
        })?;
        let value = self.call(capability, timeout, payload).await?;
        serde_json::from_value(value).map_err(|source| BusError::Decode {
            capability: capability.to_string(),
            source,
        })
    }
}

impl fmt::Debug for CapabilityBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBus")
            .field("capabilities", &self.names())
            .finish()
    }
}
