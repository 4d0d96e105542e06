//! sectest core - security test management
//!
//! Owns the security test aggregate and everything that happens to it:
//! - Persists tests and their paired threshold records
//! - Reconciles a test's schedules with the scheduling subsystem
//! - Gathers integration config fragments from plugin providers
//! - Assembles execution documents (pipeline manifest, container descriptor)
//! - Serves list / create / delete / run requests
//!
//! Every collaborator outside this crate is reached through the capability
//! bus and may be missing; the core degrades instead of failing.
//!
//! # Example
//!
//! ```rust,ignore
//! use sectest_core::prelude::*;
//! use sectest_bus::CapabilityBus;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), ServiceError> {
//! let service = TestService::new(
//!     CapabilityBus::new(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticSecrets::new()),
//!     ServiceConfig::default(),
//! );
//!
//! let created = service
//!     .create_test(ProjectId(1), CreateTestRequest::new("nightly"))
//!     .await?;
//! println!("created test {}", created.test().test_uid);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod assembler;
pub mod config;
pub mod error;
pub mod fragments;
pub mod logs;
pub mod schedules;
pub mod secrets;
pub mod service;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use assembler::{ExecutionAssembler, ExecutionDocument, OutputMode};
pub use config::{ImageConfig, ServiceConfig, TimeoutConfig, DEFAULT_CHANNEL_ALIAS};
pub use error::{BuildError, ConfigError, FieldError, SecretError, ServiceError, StoreError};
pub use fragments::{FragmentMap, FragmentResolver, ResolvedFragments};
pub use schedules::{ReconcileReport, ScheduleReconciler};
pub use secrets::{SecretResolver, StaticSecrets};
pub use service::{CreateOutcome, CreateTestRequest, RunResponse, TestList, TestService};
pub use store::{ListQuery, MemoryStore, Page, TestStore};
pub use types::{
    Category, CategorySettings, Integrations, JobKind, NewTest, Project, ProjectId, ScheduleId,
    ScheduleSpec, SecurityTest, SecurityThreshold, TestId, TestKey, Thresholds,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with sectest core
    pub use crate::{
        CreateOutcome, CreateTestRequest, ExecutionAssembler, JobKind, MemoryStore, OutputMode,
        ProjectId, ScheduleSpec, SecurityTest, ServiceConfig, ServiceError, StaticSecrets,
        TestId, TestKey, TestService, Thresholds,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
