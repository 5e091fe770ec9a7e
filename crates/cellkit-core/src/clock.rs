#![forbid(unsafe_code)]

//! Time sources for the timer queue.
//!
//! Production code reads `web_time::Instant::now()`. Tests drive a
//! [`LabClock`] by hand so that debounce and throttle timelines are exact
//! and reproducible.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use web_time::{Duration, Instant};

/// A manually-advanceable clock for deterministic tests.
///
/// All clones share the same offset, so every scheduler built on the same
/// `LabClock` sees the same time.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a new lab clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Move the clock forward to `instant`. Instants in the past are ignored;
    /// lab time never runs backwards.
    pub fn advance_to(&self, instant: Instant) {
        let target = instant
            .checked_duration_since(self.epoch)
            .unwrap_or(Duration::ZERO)
            .as_micros()
            .min(u64::MAX as u128) as u64;
        self.offset_us.fetch_max(target, Ordering::AcqRel);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.epoch + self.elapsed()
    }

    /// Time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::Acquire))
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a scheduler reads the current time from.
#[derive(Debug, Clone, Default)]
pub enum TimeSource {
    /// Real wall-clock time.
    #[default]
    System,
    /// Deterministic lab clock for testing.
    Lab(LabClock),
}

impl TimeSource {
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::System => Instant::now(),
            Self::Lab(clock) => clock.now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::Lab(_))
    }
}
