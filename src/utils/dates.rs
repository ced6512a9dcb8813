//! Date and time utilities
//!
//! Every stored `played_at` is epoch milliseconds in UTC. The provider and the
//! legacy tables hand us a mix of ISO-8601 strings and integer timestamps, so
//! everything funnels through [`parse_played_at`].

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::errors::{HistoryError, HistoryResult};

/// Integers below this are read as epoch seconds rather than milliseconds
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// How far past the local clock a play may claim to be
const MAX_FUTURE_MS: i64 = 86_400_000;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Keep `ms` only if it lies between the epoch and a day from now
pub fn plausible_played_at(ms: i64) -> Option<i64> {
    let latest = now_ms().saturating_add(MAX_FUTURE_MS);
    (0..=latest).contains(&ms).then_some(ms)
}

/// Normalize an integer timestamp to epoch milliseconds, `None` when out of range
pub fn normalize_epoch(value: i64) -> Option<i64> {
    let ms = if value.checked_abs()? < SECONDS_CUTOFF {
        value.checked_mul(1000)?
    } else {
        value
    };
    plausible_played_at(ms)
}

/// Parse a played-at timestamp into epoch milliseconds.
///
/// Accepts digit strings (epoch seconds or ms), RFC 3339 with `Z` or an
/// offset, and naive datetimes which are taken as UTC. Anything before the
/// epoch or more than a day in the future is rejected.
pub fn parse_played_at(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(normalize_epoch);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return plausible_played_at(dt.with_timezone(&Utc).timestamp_millis());
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| plausible_played_at(Utc.from_utc_datetime(&naive).timestamp_millis()))
}

/// Whole floats that fit an i64; `1e300` or `1.5` do not
fn integral_f64(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT).then_some(f as i64)
}

/// Pull a played-at timestamp out of an arbitrary JSON value
pub fn played_at_from_json(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral_f64))
            .and_then(normalize_epoch),
        Value::String(s) => parse_played_at(s),
        _ => None,
    }
}

/// Parse a window like `7d` or `24h`
pub fn parse_window(win: &str) -> HistoryResult<Duration> {
    let win = win.trim();
    let invalid = || HistoryError::Config(format!("invalid window '{}', expected e.g. 7d or 24h", win));

    let unit = win.chars().last().ok_or_else(invalid)?;
    let amount: i64 = win[..win.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    let span = match unit.to_ascii_lowercase() {
        'd' => Duration::try_days(amount),
        'h' => Duration::try_hours(amount),
        _ => None,
    };
    span.ok_or_else(invalid)
}

/// Resolve a window into an inclusive `(start_ms, end_ms)` range ending at `now_ms`
pub fn window_range_ms(win: &str, now_ms: i64) -> HistoryResult<(i64, i64)> {
    let span = parse_window(win)?;
    let start = now_ms
        .checked_sub(span.num_milliseconds())
        .ok_or_else(|| HistoryError::Config(format!("window '{}' is too large", win.trim())))?;
    Ok((start, now_ms))
}

/// Format a timestamp as "YYYY-MM-DD HH:MM:SS" (UTC)
pub fn format_datetime(ms: i64) -> String {
    let dt = DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Convert seconds to human-readable duration (e.g., "1 hr, 30 min")
pub fn seconds_to_human_readable(seconds: i64) -> String {
    if seconds < 60 {
        return format!("{} sec", seconds);
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{} min", minutes);
    }

    let hours = minutes / 60;
    let remaining_minutes = minutes % 60;

    if hours < 24 {
        if remaining_minutes > 0 {
            format!("{} hr, {} min", hours, remaining_minutes)
        } else {
            format!("{} hr", hours)
        }
    } else {
        let days = hours / 24;
        let remaining_hours = hours % 24;
        if remaining_hours > 0 {
            format!("{} days, {} hr", days, remaining_hours)
        } else {
            format!("{} days", days)
        }
    }
}
