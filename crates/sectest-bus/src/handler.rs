//! Provider-side handler trait

use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Result a provider hands back to the bus
pub type HandlerResult = Result<Value, ProviderError>;

/// A provider registered on the bus under one capability name
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Answer one request
    async fn handle(&self, payload: Value) -> HandlerResult;
}

/// Adapter turning an async closure into a [`CapabilityHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap a closure
    #[inline]
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> HandlerResult {
        (self.f)(payload).await
    }
}
