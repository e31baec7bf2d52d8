use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{RestockError, Result};

/// Format the timeline API expects for `start_time` / `end_time` parameters.
pub const API_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format used for timestamps in published reports.
pub const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Uses the `iana-time-zone` crate directly – no subprocess calls.
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

/// Resolve a configured timezone name to a [`Tz`].
///
/// `"auto"` means the system timezone; if that cannot be parsed either, UTC
/// is used with a warning. Any other unrecognised name is a configuration
/// error.
pub fn resolve_timezone(name: &str) -> Result<Tz> {
    if name.eq_ignore_ascii_case("auto") {
        let system = get_system_timezone();
        return Ok(system.parse::<Tz>().unwrap_or_else(|_| {
            warn!("system timezone \"{}\" not recognised, using UTC", system);
            Tz::UTC
        }));
    }
    name.parse::<Tz>()
        .map_err(|_| RestockError::Config(format!("unknown timezone \"{}\"", name)))
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a provider timestamp into UTC.
///
/// Accepts RFC 3339 with `Z` or a numeric offset, with or without fractional
/// seconds (`2021-03-01T12:00:00.000Z`). Naive timestamps are read as UTC.
/// Returns `None` for empty or unrecognised input.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const FMTS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    FMTS.iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Like [`parse_timestamp`] but reports failure as an error.
pub fn parse_timestamp_strict(s: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(s).ok_or_else(|| RestockError::TimestampParse(s.to_string()))
}

// ── Formatting / conversion ───────────────────────────────────────────────────

/// Format a UTC instant the way the timeline API expects it.
pub fn format_api_timestamp(dt: DateTime<Utc>) -> String {
    dt.format(API_TIME_FORMAT).to_string()
}

/// Format a UTC instant in `tz` for display.
pub fn format_local(dt: DateTime<Utc>, tz: Tz) -> String {
    dt.with_timezone(&tz).format(REPORT_TIME_FORMAT).to_string()
}

/// Day of week of `dt` in `tz`, Monday = 0.
pub fn weekday_index(dt: DateTime<Utc>, tz: Tz) -> usize {
    dt.with_timezone(&tz).weekday().num_days_from_monday() as usize
}

/// Hour of day of `dt` in `tz`, 0..=23.
pub fn hour_index(dt: DateTime<Utc>, tz: Tz) -> usize {
    dt.with_timezone(&tz).hour() as usize
}

// ── Tests ──────────────────────────────────────────────────────────────────────
