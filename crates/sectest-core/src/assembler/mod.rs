//! Execution config assembly
//!
//! Turns a test into the document its runner consumes. Two main shapes:
//! - [`pipeline`]: declarative manifest for the scanning pipeline
//! - [`container`]: flat container job descriptor
//!
//! A third output, a `docker run` command line for the control tower, is
//! produced for manual runs.
//!
//! # Example
//!
//! ```no_run
//! use sectest_core::assembler::{ExecutionAssembler, OutputMode};
//! use sectest_core::{JobKind, ServiceConfig, StaticSecrets, Thresholds};
//! use sectest_bus::CapabilityBus;
//! use std::sync::Arc;
//!
//! # async fn example(test: sectest_core::SecurityTest) -> Result<(), Box<dyn std::error::Error>> {
//! let assembler = ExecutionAssembler::new(
//!     CapabilityBus::new(),
//!     Arc::new(StaticSecrets::new()),
//!     ServiceConfig::default(),
//! );
//! let document = assembler
//!     .build(&test, OutputMode::Pipeline, JobKind::Sast, &Thresholds::unset())
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&document)?);
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod pipeline;

use crate::config::ServiceConfig;
use crate::error::BuildError;
use crate::fragments::FragmentResolver;
use crate::secrets::{secret_ref, SecretResolver};
use crate::types::{JobKind, ProjectId, SecurityTest, Thresholds};
use container::{ContainerDescriptor, ExecutionParams, MessageBusSettings};
use pipeline::{PipelineManifest, ResultsEndpoint};
use sectest_bus::CapabilityBus;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Shape of the execution document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputMode {
    /// Declarative pipeline manifest
    #[default]
    Pipeline,
    /// Container job descriptor
    Container,
    /// `docker run` command line
    Docker,
}

impl OutputMode {
    /// Lowercase identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Pipeline => "pipeline",
            OutputMode::Container => "container",
            OutputMode::Docker => "docker",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pipeline" | "yaml" => Ok(OutputMode::Pipeline),
            "container" | "cc" => Ok(OutputMode::Container),
            "docker" => Ok(OutputMode::Docker),
            other => Err(format!("unknown output mode: {other}")),
        }
    }
}

/// A built execution document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionDocument {
    /// Pipeline manifest
    Pipeline(PipelineManifest),
    /// Container descriptor
    Container(ContainerDescriptor),
    /// Docker command line
    Docker(String),
}

impl ExecutionDocument {
    /// Mode this document was built for
    #[must_use]
    pub fn mode(&self) -> OutputMode {
        match self {
            ExecutionDocument::Pipeline(_) => OutputMode::Pipeline,
            ExecutionDocument::Container(_) => OutputMode::Container,
            ExecutionDocument::Docker(_) => OutputMode::Docker,
        }
    }
}

/// Builds execution documents for tests
#[derive(Clone)]
pub struct ExecutionAssembler {
    resolver: FragmentResolver,
    secrets: Arc<dyn SecretResolver>,
    config: ServiceConfig,
}

impl ExecutionAssembler {
    /// Create assembler
    #[must_use]
    pub fn new(bus: CapabilityBus, secrets: Arc<dyn SecretResolver>, config: ServiceConfig) -> Self {
        let resolver = FragmentResolver::new(bus, config.timeouts.fragment());
        Self {
            resolver,
            secrets,
            config,
        }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Build the document for `mode`
    ///
    /// # Errors
    /// Returns error if a credential cannot be resolved or a document part
    /// cannot be serialized. Missing integration providers are not errors.
    pub async fn build(
        &self,
        test: &SecurityTest,
        mode: OutputMode,
        kind: JobKind,
        thresholds: &Thresholds,
    ) -> Result<ExecutionDocument, BuildError> {
        let document = match mode {
            OutputMode::Pipeline => {
                ExecutionDocument::Pipeline(self.build_pipeline(test, kind, thresholds).await?)
            }
            OutputMode::Container => {
                ExecutionDocument::Container(self.build_container(test, kind).await?)
            }
            OutputMode::Docker => ExecutionDocument::Docker(self.docker_command(test).await?),
        };

        tracing::info!(
            test_id = test.id.0,
            mode = mode.as_str(),
            kind = kind.as_str(),
            "execution document built"
        );
        Ok(document)
    }

    /// Build the pipeline manifest
    ///
    /// # Errors
    /// Returns error if the results service credentials cannot be resolved
    pub async fn build_pipeline(
        &self,
        test: &SecurityTest,
        kind: JobKind,
        thresholds: &Thresholds,
    ) -> Result<PipelineManifest, BuildError> {
        let results = self.results_endpoint(test.project_id).await?;
        let fragments = self.resolver.resolve_all(test).await;

        Ok(pipeline::assemble(
            test,
            kind,
            fragments,
            thresholds,
            &self.config.loki_url,
            &results,
        ))
    }

    /// Build the container descriptor
    ///
    /// # Errors
    /// Returns error if a credential cannot be resolved or the execution
    /// parameters cannot be encoded
    pub async fn build_container(
        &self,
        test: &SecurityTest,
        kind: JobKind,
    ) -> Result<ContainerDescriptor, BuildError> {
        let results = self.results_endpoint(test.project_id).await?;
        let message_bus = MessageBusSettings {
            host: self.secret("rabbit_host", test.project_id).await?,
            user: self.secret("rabbit_user", test.project_id).await?,
            password: self.secret("rabbit_password", test.project_id).await?,
        };

        let params = ExecutionParams {
            cmd: ExecutionParams::command(kind, &test.test_uid),
            galloper_url: results.url,
            galloper_project_id: test.project_id.to_string(),
            galloper_auth_token: results.token,
        };

        Ok(container::assemble(
            test,
            kind,
            self.config.images.for_kind(kind),
            &params,
            message_bus,
            &self.config.default_channel_alias,
        )?)
    }

    /// Build the control tower command line
    ///
    /// # Errors
    /// Returns error if the results service credentials cannot be resolved
    pub async fn docker_command(&self, test: &SecurityTest) -> Result<String, BuildError> {
        let results = self.results_endpoint(test.project_id).await?;
        Ok(format!(
            "docker run --rm -i -t -e project_id={} -e galloper_url={} -e token=\"{}\" {} -tid {}",
            test.project_id,
            results.url,
            results.token,
            self.config.images.control_tower_ref(),
            test.test_uid
        ))
    }

    async fn results_endpoint(&self, project_id: ProjectId) -> Result<ResultsEndpoint, BuildError> {
        Ok(ResultsEndpoint {
            url: self.secret("galloper_url", project_id).await?,
            token: self.secret("auth_token", project_id).await?,
        })
    }

    async fn secret(&self, name: &str, project_id: ProjectId) -> Result<String, BuildError> {
        Ok(self.secrets.unsecret(&secret_ref(name), project_id).await?)
    }
}

impl fmt::Debug for ExecutionAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionAssembler")
            .field("resolver", &self.resolver)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SecurityTest {
    /// Build this test's execution document
    ///
    /// # Errors
    /// See [`ExecutionAssembler::build`]
    pub async fn execution_config(
        &self,
        assembler: &ExecutionAssembler,
        mode: OutputMode,
        kind: JobKind,
        thresholds: &Thresholds,
    ) -> Result<ExecutionDocument, BuildError> {
        assembler.build(self, mode, kind, thresholds).await
    }
}
