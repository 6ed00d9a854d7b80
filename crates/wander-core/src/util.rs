//! Shared utility functions used across multiple modules.

use chrono::{DateTime, SecondsFormat, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in seconds.
pub fn unix_timestamp_now() -> i64 {
    Utc::now().timestamp()
}

/// Render a timestamp as canonical `Z`-suffixed RFC3339 UTC.
pub fn to_utc_rfc3339(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Rewrite an RFC3339 timestamp to the canonical `Z`-suffixed UTC form.
///
/// Trailing `+00:00` and `+0000` offsets are rewritten to `Z`. Unnormalized
/// offsets are prone to mangling by intermediate proxies on some cellular
/// networks once placed in a URL, so every timestamp headed for the wire
/// passes through here.
pub fn normalize_utc_timestamp(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed.strip_suffix("+00:00") {
        return format!("{stripped}Z");
    }
    if let Some(stripped) = trimmed.strip_suffix("+0000") {
        return format!("{stripped}Z");
    }
    trimmed.to_string()
}

/// Convert epoch milliseconds from a stored row to a UTC timestamp.
///
/// Out-of-range values fall back to the Unix epoch rather than failing the
/// whole row read.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
