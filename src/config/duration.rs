//! Duration parsing for settings and readiness probes.

use crate::error::{Error, Result};
use std::time::Duration;

/// Parse a duration string like "10s", "30s", "1m", "500ms".
///
/// A bare number is read as seconds. Returns `None` if the string cannot be
/// parsed.
///
/// ```
/// use bay::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("5s"), Some(Duration::from_secs(5)));
/// assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration_string("1m"), Some(Duration::from_secs(60)));
/// assert_eq!(parse_duration_string("30"), Some(Duration::from_secs(30)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Like [`parse_duration_string`], but reports which field was malformed.
pub fn parse_duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration_string(value).ok_or_else(|| {
        Error::Config(format!(
            "{}: invalid duration '{}' (expected e.g. \"500ms\", \"30s\", \"1m\")",
            field, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration_string("120s"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration_string("5m"), Some(Duration::from_secs(300)));
        assert_eq!(
            parse_duration_string(" 100ms "),
            Some(Duration::from_millis(100))
        );
        assert_eq!(parse_duration_string("0s"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_duration_string(""), None);
        assert_eq!(parse_duration_string("abc"), None);
        assert_eq!(parse_duration_string("5x"), None);
        assert_eq!(parse_duration_string("-5s"), None);
    }

    #[test]
    fn test_field_error_names_field() {
        let err = parse_duration_field("settings.bay.runtime_timeout", "soon").unwrap_err();
        assert!(err.to_string().contains("runtime_timeout"));
    }
}
