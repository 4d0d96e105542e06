//! Live log stream addressing

use crate::types::ProjectId;

/// Number of log lines a tail session may deliver
pub const LOG_TAIL_LIMIT: u64 = 10_000_000_000;

/// Websocket URL tailing the logs of one task run
///
/// Derived from the log service push URL: the scheme moves to websocket and
/// the push endpoint becomes the tail endpoint.
///
/// ```
/// use sectest_core::logs::log_stream_url;
/// use sectest_core::ProjectId;
///
/// let url = log_stream_url("http://loki:3100/loki/api/v1/push", ProjectId(1), "7", "12");
/// assert!(url.starts_with("ws://loki:3100/loki/api/v1/tail?query="));
/// ```
#[must_use]
pub fn log_stream_url(
    loki_push_url: &str,
    project_id: ProjectId,
    task_id: &str,
    result_test_id: &str,
) -> String {
    let base = if let Some(rest) = loki_push_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = loki_push_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        loki_push_url.to_string()
    };
    let base = base.replace("api/v1/push", "api/v1/tail");

    let query = format!(
        "{{task_key=\"{task_id}\",result_test_id=\"{result_test_id}\",project_id=\"{project_id}\"}}"
    );

    format!("{base}?query={query}&start=0&limit={LOG_TAIL_LIMIT}")
}
