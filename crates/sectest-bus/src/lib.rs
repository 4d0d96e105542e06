//! sectest capability bus
//!
//! A runtime registry of named providers contributed by independent plugins.
//! Callers address a provider by string name and get back either its answer
//! or a capability-absent signal:
//! - no provider registered under that name
//! - the provider did not answer before the call's deadline
//!
//! Absence is routine. Callers are expected to handle it locally and carry on.
//!
//! # Example
//!
//! ```rust,ignore
//! use sectest_bus::{CapabilityBus, names};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), sectest_bus::BusError> {
//! let bus = CapabilityBus::new();
//! bus.register_fn(names::CREATE_SCHEDULE, |_payload| async { Ok(json!(42)) });
//!
//! let id: i64 = bus
//!     .call_typed(names::CREATE_SCHEDULE, Duration::from_secs(2), &json!({"cron": "0 * * * *"}))
//!     .await?;
//! assert_eq!(id, 42);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod handler;
pub mod names;

pub use bus::CapabilityBus;
pub use error::{BusError, ProviderError};
pub use handler::{CapabilityHandler, FnHandler, HandlerResult};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
