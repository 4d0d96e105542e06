//! Capability names consumed by the security test core

/// Create one schedule, answers with the new schedule id
pub const CREATE_SCHEDULE: &str = "create-schedule";

/// Delete a batch of schedules by id
pub const DELETE_SCHEDULES: &str = "delete-schedules";

/// Load schedule records by id for display
pub const LOAD_SCHEDULES: &str = "load-schedules";

/// Look up a project, failing when it does not exist
pub const PROJECT_GET_OR_404: &str = "project-get-or-404";

/// Dispatch a container execution descriptor
pub const RUN_TASK: &str = "run-task";

/// Prefix of per-integration configuration fragment providers
pub const CONFIG_FRAGMENT_PREFIX: &str = "config-fragment";

/// Capability name of the fragment provider for one integration
///
/// ```
/// assert_eq!(
///     sectest_bus::names::config_fragment("scanners", "semgrep"),
///     "config-fragment:scanners:semgrep"
/// );
/// ```
#[must_use]
pub fn config_fragment(category: &str, integration: &str) -> String {
    format!("{CONFIG_FRAGMENT_PREFIX}:{category}:{integration}")
}
