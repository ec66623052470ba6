//! Millisecond timestamp helpers.
//!
//! All interval arithmetic in the pipeline stays in integer milliseconds since
//! the Unix epoch. These helpers only exist for display and logging.

use chrono::{DateTime, SecondsFormat, Utc};

/// Converts epoch milliseconds to a UTC datetime.
///
/// Returns `None` when the value is outside chrono's representable range.
pub fn datetime_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Formats epoch milliseconds as RFC 3339 with millisecond precision.
///
/// Out-of-range values fall back to the raw number.
pub fn format_millis(ms: i64) -> String {
    datetime_from_millis(ms).map_or_else(
        || ms.to_string(),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Formats a duration in milliseconds as `1h 02m 03s`.
pub fn format_duration_ms(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let total_secs = ms.unsigned_abs() / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{sign}{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{sign}{minutes}m {seconds:02}s")
    } else {
        format!("{sign}{seconds}s")
    }
}
