//! Multi-window token bucket throttling and per-client allowance state.

mod clock;
mod definition;
mod interval;
mod policy;
mod source;
mod throttler;
mod tracker;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use definition::{ThrottleDefinitionSet, ThrottleLimitDefinition, DEFAULT_UNITS};
pub use interval::ThrottleInterval;
pub use policy::{
    default_message, AllowPolicy, DenyPolicy, LimitExceeded, LoggingPolicy, RejectionPolicy,
    TooManyRequestsPolicy, Verdict,
};
pub use source::{
    AllowanceTrackerSource, InMemoryTrackerSource, SharedTracker, TrackerStoreSettings,
    DEFAULT_IDLE_TTL, DEFAULT_MAX_CLIENTS, DEFAULT_SWEEP_INTERVAL,
};
pub use throttler::{
    PassThroughThrottler, Throttler, TokenBucketThrottler, TokenBucketThrottlerBuilder,
    DEFAULT_THROTTLER_NAME,
};
pub use tracker::AllowanceTracker;
