//! Small helpers shared by the config, remote and CLI layers.

/// Longest remote error body kept in an error message
const ERROR_SNIPPET_CHARS: usize = 180;

/// Trim a configured value; blank or missing values become `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_owned)
}

/// Whether a remote endpoint uses a scheme the HTTP client can talk to.
pub fn is_http_url(endpoint: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| endpoint.starts_with(scheme))
}

/// Shorten a remote response body so it fits in an error message.
pub fn compact_text(body: &str) -> String {
    body.trim().chars().take(ERROR_SNIPPET_CHARS).collect()
}

/// Wall clock in Unix milliseconds, the unit of every sync timestamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
