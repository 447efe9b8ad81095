use chrono::{DateTime, Utc};
use std::time::Duration;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Rounds to the nearest whole second, saturating at `i32::MAX`.
pub fn rounded_seconds(duration: Duration) -> i32 {
    let secs = (duration.as_millis() + 500) / 1000;
    i32::try_from(secs).unwrap_or(i32::MAX)
}

/// Converts a chrono span to std, clamping negative spans to zero.
pub fn non_negative(span: chrono::Duration) -> Duration {
    span.to_std().unwrap_or(Duration::ZERO)
}
