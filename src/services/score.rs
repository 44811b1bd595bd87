//! Time-decayed popularity ("gravity" ranking).
//!
//! A post's popularity is `(score - 1) / (hours + 2)^gravity`. A post nobody
//! upvoted starts below zero and keeps sinking toward it as it ages.

use chrono::{DateTime, Utc};

pub const DEFAULT_GRAVITY: f64 = 1.8;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Fractional hours from `created_at` to `now`, clamped at zero for
/// timestamps in the future.
pub fn hours_between(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - created_at).num_milliseconds().max(0);
    millis as f64 / MILLIS_PER_HOUR
}

pub fn popularity(score: i32, created_at: DateTime<Utc>, now: DateTime<Utc>, gravity: f64) -> f64 {
    let hours = hours_between(created_at, now);
    f64::from(score - 1) / (hours + 2.0).powf(gravity)
}
