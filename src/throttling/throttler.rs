//! Token bucket throttler enforcing several windows at once.
//!
//! Each client has one allowance per configured window. On every request the
//! allowances are refilled in proportion to the time since the client's last
//! request, capped at the window limit, and then debited by the requested
//! cost. A request needs strictly more allowance than it costs in every
//! window.

use std::sync::Arc;

use tracing::{debug, trace};

use super::clock::{elapsed_seconds, SystemTimeSource, TimeSource};
use super::definition::{ThrottleDefinitionSet, ThrottleLimitDefinition};
use super::policy::{LimitExceeded, RejectionPolicy, TooManyRequestsPolicy, Verdict};
use super::source::{AllowanceTrackerSource, InMemoryTrackerSource, TrackerStoreSettings};
use super::tracker::AllowanceTracker;
use super::ThrottleInterval;
use crate::error::{Result, ThrottlerError, ThrottlingError};

/// Name given to throttlers built without one.
pub const DEFAULT_THROTTLER_NAME: &str = "token-bucket";

/// Top-level interface for throttling.
pub trait Throttler: Send + Sync {
    /// Decide whether a request costing `requested` units may proceed.
    ///
    /// Returns `Ok(true)` when the request is within all usage limits.
    /// Depending on the rejection policy an exceeded limit produces
    /// `Ok(false)` or [`ThrottlingError::TooManyRequests`].
    fn proceed_with_cost(
        &self,
        identifier: &str,
        requested: f64,
    ) -> std::result::Result<bool, ThrottlingError>;

    /// Equivalent to `proceed_with_cost(identifier, 1.0)`.
    fn proceed(&self, identifier: &str) -> std::result::Result<bool, ThrottlingError> {
        self.proceed_with_cost(identifier, 1.0)
    }

    /// The name of the throttler.
    fn name(&self) -> &str;
}

/// A throttler that admits every request.
#[derive(Debug, Clone)]
pub struct PassThroughThrottler {
    name: String,
}

impl PassThroughThrottler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for PassThroughThrottler {
    fn default() -> Self {
        Self::new("pass-through")
    }
}

impl Throttler for PassThroughThrottler {
    fn proceed_with_cost(&self, _: &str, _: f64) -> std::result::Result<bool, ThrottlingError> {
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Multi-window token bucket throttler.
///
/// This struct is thread-safe and can be shared across threads and tasks.
/// Requests for one client are evaluated one at a time; different clients
/// never wait on each other.
pub struct TokenBucketThrottler {
    name: String,
    time_source: Arc<dyn TimeSource>,
    definitions: Arc<ThrottleDefinitionSet>,
    source: Arc<dyn AllowanceTrackerSource>,
    policy: Box<dyn RejectionPolicy>,
}

impl TokenBucketThrottler {
    /// Create a throttler with an in-memory tracker store and the
    /// [`TooManyRequestsPolicy`].
    pub fn new(
        time_source: Arc<dyn TimeSource>,
        definitions: ThrottleDefinitionSet,
    ) -> Result<Self> {
        Self::builder(definitions).time_source(time_source).build()
    }

    pub fn builder(definitions: ThrottleDefinitionSet) -> TokenBucketThrottlerBuilder {
        TokenBucketThrottlerBuilder::new(definitions)
    }

    /// The configured windows.
    pub fn definitions(&self) -> &ThrottleDefinitionSet {
        &self.definitions
    }

    /// Stored allowance of `client_id` for `interval`, without refilling.
    ///
    /// Returns `None` for clients that are not tracked.
    pub fn allowance(&self, client_id: &str, interval: ThrottleInterval) -> Option<f64> {
        self.source
            .peek(client_id)
            .and_then(|tracker| {
                let tracker = tracker.lock();
                tracker.allowance(interval)
            })
    }

    /// Number of clients with allowance state.
    pub fn tracked_clients(&self) -> usize {
        self.source.tracked_count()
    }

    fn is_allowed(requested: f64, allowance: f64) -> bool {
        allowance - requested > 0.0
    }

    fn refill(allowance: f64, elapsed_secs: f64, definition: &ThrottleLimitDefinition) -> f64 {
        let limit = definition.limit() as f64;
        (allowance + elapsed_secs * definition.rate()).min(limit)
    }
}

impl Throttler for TokenBucketThrottler {
    fn proceed_with_cost(
        &self,
        identifier: &str,
        requested: f64,
    ) -> std::result::Result<bool, ThrottlingError> {
        if identifier.is_empty() {
            return Err(ThrottlingError::InvalidCall("Id cannot be empty".to_string()));
        }
        if !(requested.is_finite() && requested > 0.0) {
            return Err(ThrottlingError::InvalidCall(format!(
                "Requested resource units must be > 0 but was {}",
                requested
            )));
        }

        loop {
            let shared = self.source.allowance(identifier)?;
            let mut tracker = shared.lock();
            // Evicted between lookup and lock; the store holds a replacement.
            if tracker.is_evicted() {
                continue;
            }
            return self.evaluate(identifier, requested, &mut tracker);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl TokenBucketThrottler {
    fn evaluate(
        &self,
        identifier: &str,
        requested: f64,
        tracker: &mut AllowanceTracker,
    ) -> std::result::Result<bool, ThrottlingError> {
        let now = self.time_source.now();
        let elapsed = elapsed_seconds(tracker.last_check(), now);
        tracker.record_check(now);

        trace!(
            throttler = %self.name,
            client = %identifier,
            elapsed_ms = elapsed * 1000.0,
            "Interval between requests"
        );

        for (interval, definition) in self.definitions.throttle_limits() {
            let current = tracker
                .allowance(interval)
                .unwrap_or(definition.limit() as f64);
            let allowance = Self::refill(current, elapsed, definition);
            tracker.set_allowance(interval, allowance);

            debug!(
                client = %identifier,
                interval = %interval,
                allowance = %format!("{:.4}", allowance),
                units = %definition.units(),
                "Allowance refilled"
            );

            if Self::is_allowed(requested, allowance) {
                tracker.decrement_allowance(interval, allowance, requested);
                continue;
            }

            let exceeded = LimitExceeded {
                client_id: identifier,
                interval,
                definition,
                allowance,
                requested,
            };
            let message = self.policy.exceeded_message(&exceeded);
            debug!(client = %identifier, interval = %interval, "Throttle limit exceeded");

            match self.policy.on_exceeded(&exceeded, message)? {
                Verdict::Admit => continue,
                Verdict::Deny => return Ok(false),
            }
        }

        Ok(true)
    }
}

impl std::fmt::Debug for TokenBucketThrottler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketThrottler")
            .field("name", &self.name)
            .field("definitions", &self.definitions)
            .field("tracked_clients", &self.source.tracked_count())
            .finish()
    }
}

/// Builder for [`TokenBucketThrottler`].
pub struct TokenBucketThrottlerBuilder {
    name: String,
    definitions: ThrottleDefinitionSet,
    time_source: Arc<dyn TimeSource>,
    policy: Box<dyn RejectionPolicy>,
    settings: TrackerStoreSettings,
    source: Option<Arc<dyn AllowanceTrackerSource>>,
}

impl TokenBucketThrottlerBuilder {
    fn new(definitions: ThrottleDefinitionSet) -> Self {
        Self {
            name: DEFAULT_THROTTLER_NAME.to_string(),
            definitions,
            time_source: Arc::new(SystemTimeSource),
            policy: Box::new(TooManyRequestsPolicy),
            settings: TrackerStoreSettings::default(),
            source: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn policy(mut self, policy: impl RejectionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn boxed_policy(mut self, policy: Box<dyn RejectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Bounds for the default in-memory tracker store.
    pub fn tracker_settings(mut self, settings: TrackerStoreSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a custom tracker store instead of the in-memory one.
    ///
    /// The store is expected to initialise trackers from the same definitions.
    pub fn tracker_source(mut self, source: Arc<dyn AllowanceTrackerSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Build the throttler.
    ///
    /// Fails if no throttle definitions were provided.
    pub fn build(self) -> Result<TokenBucketThrottler> {
        if self.definitions.is_empty() {
            return Err(ThrottlerError::Config(
                "ThrottleDefinitionSet must have >= 1 throttle definition set provided".to_string(),
            ));
        }

        let definitions = Arc::new(self.definitions);
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(InMemoryTrackerSource::with_settings(
                Arc::clone(&self.time_source),
                Arc::clone(&definitions),
                self.settings,
            )),
        };

        debug!(
            throttler = %self.name,
            windows = definitions.definition_count(),
            "Token bucket throttler initialized"
        );

        Ok(TokenBucketThrottler {
            name: self.name,
            time_source: self.time_source,
            definitions,
            source,
            policy: self.policy,
        })
    }
}
