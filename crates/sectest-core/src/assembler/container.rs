//! Container execution descriptor
//!
//! A flat job description for the container runner: which image to start,
//! which command and connection parameters to pass, on which channel.

use crate::types::{Category, JobKind, SecurityTest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reporter whose presence turns on the quality gate flag
pub const QUALITY_REPORTER: &str = "quality";

/// Channel used when the scan location is the default alias
pub const DEFAULT_CHANNEL: &str = "default";

/// Container execution descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Test name
    pub job_name: String,
    /// Job kind
    pub job_type: String,
    /// Containers started per run
    pub concurrency: u32,
    /// Image reference
    pub container: String,
    /// JSON-encoded command and infrastructure parameters
    pub execution_params: String,
    /// Message bus connection settings
    pub cc_env_vars: BTreeMap<String, String>,
    /// Execution channel
    pub channel: String,
    /// Set when a quality reporter is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gate: Option<String>,
}

/// Command and connection parameters passed to the job container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// Container command line
    pub cmd: String,
    /// Results service URL
    #[serde(rename = "GALLOPER_URL")]
    pub galloper_url: String,
    /// Owning project id
    #[serde(rename = "GALLOPER_PROJECT_ID")]
    pub galloper_project_id: String,
    /// Results service token
    #[serde(rename = "GALLOPER_AUTH_TOKEN")]
    pub galloper_auth_token: String,
}

impl ExecutionParams {
    /// Run command for a test
    #[must_use]
    pub fn command(kind: JobKind, test_uid: &str) -> String {
        format!("run -b centry:{kind}_{test_uid} -s {kind}")
    }
}

/// Message bus connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBusSettings {
    /// Broker host
    pub host: String,
    /// Broker user
    pub user: String,
    /// Broker password
    pub password: String,
}

impl MessageBusSettings {
    /// As container environment variables
    #[must_use]
    pub fn into_env(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("RABBIT_HOST".to_string(), self.host),
            ("RABBIT_USER".to_string(), self.user),
            ("RABBIT_PASSWORD".to_string(), self.password),
        ])
    }
}

/// Execution channel for a scan location
#[must_use]
pub fn resolve_channel(scan_location: &str, default_alias: &str) -> String {
    if scan_location == default_alias {
        DEFAULT_CHANNEL.to_string()
    } else {
        scan_location.to_string()
    }
}

/// Assemble the descriptor
///
/// # Errors
/// Returns error if the execution parameters cannot be encoded
pub fn assemble(
    test: &SecurityTest,
    kind: JobKind,
    image: &str,
    params: &ExecutionParams,
    message_bus: MessageBusSettings,
    default_alias: &str,
) -> Result<ContainerDescriptor, serde_json::Error> {
    let quality_gate = test
        .integrations
        .contains(Category::Reporters, QUALITY_REPORTER)
        .then(|| "true".to_string());

    Ok(ContainerDescriptor {
        job_name: test.name.clone(),
        job_type: kind.as_str().to_string(),
        concurrency: 1,
        container: image.to_string(),
        execution_params: serde_json::to_string(params)?,
        cc_env_vars: message_bus.into_env(),
        channel: resolve_channel(&test.scan_location, default_alias),
        quality_gate,
    })
}
