//! Presentation timestamps for capture and encode
//!
//! One monotonic clock is shared between the camera and the microphone of a
//! pipeline so their units interleave correctly in the container.

use std::sync::Arc;
use std::time::Instant;

/// Monotonic clock for presentation timestamps
///
/// All timestamps derive from this single source
/// to ensure monotonic ordering.
#[derive(Debug, Clone)]
pub struct PTSClock {
    start: Arc<Instant>,
}

impl PTSClock {
    /// Create a new PTS clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Share the timebase of an existing start instant
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Elapsed time since clock creation, in microseconds
    #[inline]
    pub fn pts_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Timestamp for an instant after the clock's start, in microseconds
    #[inline]
    pub fn pts_us_at(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(*self.start).as_micros() as u64
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Microseconds to the seconds-based timestamps container APIs take
#[inline]
pub fn us_to_secs(pts_us: u64) -> f64 {
    pts_us as f64 / 1_000_000.0
}

/// Duration of `samples` per-channel samples at `sample_rate`, in microseconds
#[inline]
pub fn samples_to_us(samples: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples * 1_000_000 / u64::from(sample_rate)
}
