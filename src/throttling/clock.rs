//! Time sources used to measure allowance refill.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Source of the current instant.
///
/// Injected into the throttler so the refill algorithm can be driven by a
/// simulated clock in tests.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at the Unix epoch.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move the clock forward (or backward, for negative values) by `seconds`.
    pub fn advance_secs(&self, seconds: f64) {
        let nanos = (seconds * 1_000_000_000.0).round() as i64;
        self.advance(TimeDelta::nanoseconds(nanos));
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::at_epoch()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Seconds elapsed from `earlier` to `later`, never negative.
pub(crate) fn elapsed_seconds(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later.signed_duration_since(earlier);
    if delta <= TimeDelta::zero() {
        return 0.0;
    }
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1_000_000_000.0,
        // beyond ~292 years; millisecond resolution is plenty there
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}
