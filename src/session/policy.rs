//! Session validity rules

use std::time::Duration;

/// Whether a recorded authentication still covers `now`.
///
/// The window is inclusive. A timestamp from the future (the clock moved
/// backward since it was written) is accepted.
pub fn is_valid(stored: Option<i64>, now: i64, window: Duration) -> bool {
    let Some(stored) = stored else {
        return false;
    };

    let elapsed = now.saturating_sub(stored);
    if elapsed < 0 {
        return true;
    }

    let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    elapsed <= window_secs
}

/// Resolve the reuse window from an override string such as `KEYMASTER_TTL`.
///
/// Accepts decimal seconds (`"60"`, `"1.5"`); anything missing, negative or
/// unparseable falls back to `default`. The result is logged.
pub fn resolve_window(override_value: Option<&str>, default: Duration) -> Duration {
    let window = override_value
        .and_then(parse_seconds)
        .unwrap_or(default);

    tracing::info!(ttl_secs = window.as_secs_f64(), "session reuse window");
    window
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let secs = raw.parse::<f64>().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
