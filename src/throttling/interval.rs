//! Window identifiers for throttle limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A throttling window with a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleInterval {
    /// 15 second window
    #[serde(rename = "quarter_min", alias = "quarter_minute")]
    QuarterMinute,
    /// Per-minute window
    Minute,
    /// Per-hour window
    Hour,
    /// Per-day window
    Day,
}

impl ThrottleInterval {
    /// All intervals, shortest first.
    pub const ALL: [ThrottleInterval; 4] = [
        ThrottleInterval::QuarterMinute,
        ThrottleInterval::Minute,
        ThrottleInterval::Hour,
        ThrottleInterval::Day,
    ];

    /// Length of this window in whole seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            ThrottleInterval::QuarterMinute => 15,
            ThrottleInterval::Minute => 60,
            ThrottleInterval::Hour => 3600,
            ThrottleInterval::Day => 86400,
        }
    }

    /// Get the duration of this window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    /// Human-readable name used in log lines and rejection messages.
    pub fn label(&self) -> &'static str {
        match self {
            ThrottleInterval::QuarterMinute => "15 seconds",
            ThrottleInterval::Minute => "minute",
            ThrottleInterval::Hour => "hour",
            ThrottleInterval::Day => "day",
        }
    }
}

impl std::fmt::Display for ThrottleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
