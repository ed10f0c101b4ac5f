//! Time and duration conversion utilities.
//!
//! This module provides safe conversion functions for durations,
//! avoiding truncation issues with explicit saturation behavior.

use std::time::Duration;

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;

    /// Convert duration to milliseconds as i64, saturating at `i64::MAX`.
    ///
    /// Useful for database storage.
    fn as_millis_i64(&self) -> i64;

    /// Fraction of `total` covered by this duration, clamped to `[0.0, 1.0]`.
    ///
    /// A zero `total` counts as fully elapsed.
    fn fraction_of(&self, total: Duration) -> f64;

    /// Format as `m:ss` for progress displays.
    fn to_clock(&self) -> String;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }

    fn as_millis_i64(&self) -> i64 {
        i64::try_from(self.as_millis()).unwrap_or(i64::MAX)
    }

    fn fraction_of(&self, total: Duration) -> f64 {
        if total.is_zero() {
            return 1.0;
        }
        (self.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
    }

    fn to_clock(&self) -> String {
        let secs = self.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Duration covered by `frames` samples at `sample_rate` Hz.
#[must_use]
pub fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let frames = u64::try_from(frames).unwrap_or(u64::MAX);
    let rate = u64::from(sample_rate);
    let whole = frames / rate;
    let rem = frames % rate;
    // rem < rate <= u32::MAX, so the nanosecond term fits in u64
    Duration::from_secs(whole) + Duration::from_nanos(rem * 1_000_000_000 / rate)
}
