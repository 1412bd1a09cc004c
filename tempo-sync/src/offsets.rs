//! Offset and correction math.
//!
//! Corrections pull every clock toward the fleet's average offset rather than
//! toward the reference itself, so the fleet agrees with itself even when the
//! reference jitters. By construction the corrections sum to zero.

use chrono::{DateTime, Utc};

/// `observed - reference` in signed fractional seconds (microsecond resolution).
pub fn offset_seconds(observed: DateTime<Utc>, reference: DateTime<Utc>) -> f64 {
    let delta = observed - reference;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        // Beyond ~292k years of skew; millisecond resolution is plenty.
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn average_offset(offsets: &[f64]) -> Option<f64> {
    if offsets.is_empty() {
        return None;
    }
    Some(offsets.iter().sum::<f64>() / offsets.len() as f64)
}

/// `average - offset` for each offset, alongside the average.
pub fn corrections(offsets: &[f64]) -> Option<(f64, Vec<f64>)> {
    let average = average_offset(offsets)?;
    Some((average, offsets.iter().map(|o| average - o).collect()))
}

/// Convert fractional seconds into a chrono duration (microsecond precision).
pub fn seconds_to_duration(seconds: f64) -> chrono::Duration {
    chrono::Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}
