//! Prometheus-style duration strings (`90s`, `1h30m`, `1d`, `2w`).
//!
//! Used for rule `for` fields, PromQL range selectors and every duration
//! setting in the config file.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const MILLISECOND: u64 = 1;
const SECOND: u64 = 1000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+)y)?(?:(\d+)w)?(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?(?:(\d+)ms)?$")
        .unwrap()
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not a valid duration string: {0:?}")]
pub struct DurationError(pub String);

/// Parse a duration string. Units must appear largest first and at most once.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(DurationError(s.to_string()));
    }
    let caps = DURATION_RE
        .captures(s)
        .ok_or_else(|| DurationError(s.to_string()))?;

    let units = [YEAR, WEEK, DAY, HOUR, MINUTE, SECOND, MILLISECOND];
    let mut total: u64 = 0;
    for (idx, mult) in units.iter().enumerate() {
        if let Some(m) = caps.get(idx + 1) {
            let v: u64 = m
                .as_str()
                .parse()
                .map_err(|_| DurationError(s.to_string()))?;
            total = v
                .checked_mul(*mult)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(|| DurationError(s.to_string()))?;
        }
    }
    Ok(Duration::from_millis(total))
}

/// Render a duration the way Prometheus does. Years and weeks are only used
/// when they divide the duration exactly, so `90d` stays `90d`.
pub fn format_duration(d: Duration) -> String {
    let mut ms = d.as_millis() as u64;
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    let mut emit = |unit: &str, mult: u64, exact: bool| {
        if exact && ms % mult != 0 {
            return;
        }
        let v = ms / mult;
        if v > 0 {
            out.push_str(&format!("{v}{unit}"));
            ms -= v * mult;
        }
    };
    emit("y", YEAR, true);
    emit("w", WEEK, true);
    emit("d", DAY, false);
    emit("h", HOUR, false);
    emit("m", MINUTE, false);
    emit("s", SECOND, false);
    emit("ms", MILLISECOND, false);
    out
}
