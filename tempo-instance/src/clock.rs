//! Instance-side logical clock.
//!
//! The clock advances by a fixed step per tick, independent of the wall clock,
//! so its value is always `start + ticks * step + sum(corrections)`. Ticks and
//! corrections take the same lock; neither can overwrite the other.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;

use crate::error::InstanceError;

/// Seconds added per tick.
pub const TICK_STEP_SECS: i64 = 1;

/// Default bound for the startup skew, seconds.
pub const DEFAULT_MAX_JITTER_SECS: u32 = 60;

#[derive(Debug)]
struct ClockState {
    now: DateTime<Utc>,
    ticks: u64,
    corrected_us: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockStats {
    pub ticks: u64,
    /// Sum of every correction applied so far, jitter included, in microseconds.
    pub corrected_us: i64,
}

#[derive(Debug)]
pub struct LogicalClock {
    state: Mutex<ClockState>,
}

impl LogicalClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ClockState {
                now: start,
                ticks: 0,
                corrected_us: 0,
            }),
        }
    }

    /// Start from the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn read(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    /// `HH:MM:SS` of the logical time.
    pub fn formatted(&self) -> String {
        self.read().format("%H:%M:%S").to_string()
    }

    pub fn stats(&self) -> ClockStats {
        let state = self.state.lock();
        ClockStats {
            ticks: state.ticks,
            corrected_us: state.corrected_us,
        }
    }

    /// Advance by [`TICK_STEP_SECS`].
    pub fn tick(&self) -> DateTime<Utc> {
        let mut state = self.state.lock();
        state.now += Duration::seconds(TICK_STEP_SECS);
        state.ticks += 1;
        state.now
    }

    /// Add `seconds` (signed, fractional) to the logical time.
    pub fn apply_correction(&self, seconds: f64) -> Result<DateTime<Utc>, InstanceError> {
        if !seconds.is_finite() {
            return Err(InstanceError::InvalidCorrection { seconds });
        }
        let micros = seconds * 1_000_000.0;
        if micros.abs() >= i64::MAX as f64 {
            return Err(InstanceError::InvalidCorrection { seconds });
        }
        let delta = Duration::microseconds(micros.round() as i64);

        let mut state = self.state.lock();
        let next = state
            .now
            .checked_add_signed(delta)
            .ok_or(InstanceError::InvalidCorrection { seconds })?;
        state.now = next;
        state.corrected_us = state.corrected_us.saturating_add(delta.num_microseconds().unwrap_or(0));
        Ok(next)
    }

    /// Skew the clock by a uniform random whole number of seconds in
    /// `[-max_secs, max_secs]`. Returns the applied offset.
    pub fn apply_jitter(&self, max_secs: u32) -> i64 {
        let max = i64::from(max_secs);
        let offset = rand::thread_rng().gen_range(-max..=max);
        let mut state = self.state.lock();
        state.now += Duration::seconds(offset);
        state.corrected_us += offset * 1_000_000;
        offset
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::starting_now()
    }
}
