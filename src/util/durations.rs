//! Duration strings as they appear in job files.
//!
//! Accepts plain numeric seconds (`"300"`, `300`, `4.5`) and suffixed forms
//! (`"1500ms"`, `"10s"`, `"5min"`, `"2h"`).

use serde_json::Value;

/// Parse a duration value from a job file into seconds.
///
/// Returns `None` for malformed input; callers warn and ignore the field.
pub fn parse_duration(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|s| *s >= 0.0),
        Value::String(s) => parse_duration_str(s),
        _ => None,
    }
}

pub fn parse_duration_str(s: &str) -> Option<f64> {
    let s = s.trim();
    let (num, factor) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 0.001)
    } else if let Some(rest) = s.strip_suffix("min") {
        (rest, 60.0)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3600.0)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1.0)
    } else {
        (s, 1.0)
    };
    let num: f64 = num.trim().parse().ok()?;
    if num < 0.0 {
        return None;
    }
    Some(num * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_seconds() {
        assert_eq!(parse_duration_str("300"), Some(300.0));
        assert_eq!(parse_duration_str("4.5"), Some(4.5));
    }

    #[test]
    fn suffixed() {
        assert_eq!(parse_duration_str("1500ms"), Some(1.5));
        assert_eq!(parse_duration_str("10s"), Some(10.0));
        assert_eq!(parse_duration_str("5min"), Some(300.0));
        assert_eq!(parse_duration_str("2h"), Some(7200.0));
    }

    #[test]
    fn malformed() {
        assert_eq!(parse_duration_str("abc"), None);
        assert_eq!(parse_duration_str("-3s"), None);
    }
}
