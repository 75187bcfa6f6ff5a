//! Shared parsing utilities for the cleaning pipeline.
//!
//! These are the cell-level rules: what counts as a missing value, how a
//! column name is normalized, and which textual forms parse as a date or a
//! price.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// Common error/missing value markers in data.
pub const MISSING_MARKERS: [&str; 10] = [
    "error", "unknown", "n/a", "na", "nan", "null", "missing", "none", "#n/a", "-",
];

/// Date-only layouts, tried in order.
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"];

/// Date-time layouts without offset, tried in order.
const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Normalize a column name for matching: trim whitespace, lowercase.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Check if a string is an error/missing value marker.
///
/// # Example
///
/// ```rust,ignore
/// use price_pipeline::utils::is_missing_marker;
///
/// assert!(is_missing_marker("N/A"));
/// assert!(is_missing_marker("  "));
/// assert!(!is_missing_marker("42"));
/// ```
pub fn is_missing_marker(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    lower.is_empty() || MISSING_MARKERS.iter().any(|&marker| lower == marker)
}

/// Parse a price cell as a finite decimal number.
///
/// Only plain decimal notation is accepted (optionally signed, optionally in
/// exponent form); thousands separators and currency symbols are not
/// stripped because their meaning differs between sources.
pub fn parse_price(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if is_missing_marker(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date cell, truncating any time component.
///
/// Accepts ISO dates, RFC 3339 timestamps, `DD.MM.YYYY` (with optional
/// time), `YYYY/MM/DD`, `MM/DD/YYYY` and Unix epoch seconds or milliseconds.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    if is_missing_marker(trimmed) {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return parse_epoch(trimmed);
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }

    None
}

/// Interpret an all-digit cell as a date.
///
/// Eight digits are read as `YYYYMMDD`; 10 and 13 digit values as Unix
/// seconds and milliseconds respectively.
fn parse_epoch(digits: &str) -> Option<NaiveDate> {
    match digits.len() {
        8 => NaiveDate::parse_from_str(digits, "%Y%m%d").ok(),
        10 => {
            let secs = digits.parse::<i64>().ok()?;
            DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
        }
        13 => {
            let millis = digits.parse::<i64>().ok()?;
            DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
        }
        _ => None,
    }
}

/// Round a price to the two fraction digits the sink stores.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
