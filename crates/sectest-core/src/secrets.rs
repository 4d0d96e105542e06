//! Secret resolution
//!
//! Execution documents carry infrastructure credentials as templates such as
//! `{{secret.galloper_url}}`, resolved per project right before a document
//! is emitted.

use crate::error::SecretError;
use crate::types::ProjectId;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*secret\.([A-Za-z0-9_\-]+)\s*\}\}").expect("secret pattern is valid")
});

/// Template referencing a named secret
///
/// ```
/// assert_eq!(sectest_core::secrets::secret_ref("auth_token"), "{{secret.auth_token}}");
/// ```
#[must_use]
pub fn secret_ref(name: &str) -> String {
    format!("{{{{secret.{name}}}}}")
}

/// Resolves secret templates for a project
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Replace every secret reference in `template`
    async fn unsecret(&self, template: &str, project_id: ProjectId) -> Result<String, SecretError>;
}

/// Secrets held in memory
///
/// Project-scoped values shadow global ones. Unknown names resolve to an
/// empty string.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    global: HashMap<String, String>,
    projects: HashMap<ProjectId, HashMap<String, String>>,
}

impl StaticSecrets {
    /// Create empty secret set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a secret visible to every project
    #[must_use]
    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.global.insert(name.into(), value.into());
        self
    }

    /// With a secret visible to one project
    #[must_use]
    pub fn with_project(
        mut self,
        project_id: ProjectId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.projects
            .entry(project_id)
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Look up a secret value
    #[must_use]
    pub fn lookup(&self, name: &str, project_id: ProjectId) -> Option<&str> {
        self.projects
            .get(&project_id)
            .and_then(|secrets| secrets.get(name))
            .or_else(|| self.global.get(name))
            .map(String::as_str)
    }
}

impl FromIterator<(String, String)> for StaticSecrets {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            global: iter.into_iter().collect(),
            projects: HashMap::new(),
        }
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn unsecret(&self, template: &str, project_id: ProjectId) -> Result<String, SecretError> {
        let resolved = SECRET_PATTERN.replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            if let Some(value) = self.lookup(name, project_id) {
                value.to_string()
            } else {
                tracing::warn!(secret = name, project_id = project_id.0, "secret not defined");
                String::new()
            }
        });
        Ok(resolved.into_owned())
    }
}
