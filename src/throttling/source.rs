//! Storage of per-client allowance trackers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::clock::{elapsed_seconds, TimeSource};
use super::definition::ThrottleDefinitionSet;
use super::tracker::AllowanceTracker;
use crate::error::{Result, ThrottlerError};

/// Default upper bound on tracked clients.
pub const DEFAULT_MAX_CLIENTS: usize = 10_000;
/// Default time after which an unused tracker may be evicted.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(86_400);
/// Default minimum time between two idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Trackers inspected when the store is full and no sweep is due.
const EVICTION_SAMPLE: usize = 32;

/// A tracker shared between the store and callers evaluating requests.
///
/// The mutex serializes evaluations for one client.
pub type SharedTracker = Arc<Mutex<AllowanceTracker>>;

/// Source of allowance trackers keyed by client id.
pub trait AllowanceTrackerSource: Send + Sync {
    /// Get or create the tracker for `id`.
    ///
    /// Concurrent calls for the same new id all receive the same tracker.
    fn allowance(&self, id: &str) -> Result<SharedTracker>;

    /// Get the tracker for `id` without creating one.
    fn peek(&self, id: &str) -> Option<SharedTracker>;

    /// Number of clients currently tracked.
    fn tracked_count(&self) -> usize;
}

/// Bounds for the in-memory tracker store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStoreSettings {
    /// Maximum number of trackers kept at once
    pub max_clients: usize,
    /// Trackers not checked for this long are evicted first.
    /// Never shorter than the longest configured window.
    pub idle_ttl: Duration,
    /// Minimum time between two idle sweeps of a full store
    pub sweep_interval: Duration,
}

impl Default for TrackerStoreSettings {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            idle_ttl: DEFAULT_IDLE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Keeps allowance trackers in memory.
///
/// The store is bounded. Once `max_clients` trackers exist, creating a new
/// one first sweeps idle trackers, at most once per `sweep_interval`. The
/// idle TTL is raised to the longest window, so a swept tracker had already
/// refilled completely and nothing is lost.
///
/// If the store is still full, a bounded sample of trackers is inspected and
/// the one closest to a full refill is evicted. Fully refilled trackers go
/// without loss. Evicting a partially refilled tracker hands that client a
/// fresh allowance on its next request; this trades limit accuracy for a
/// memory bound and is logged as a warning. Raise `max_clients` if it shows
/// up in practice.
///
/// Evicted trackers are flagged so that callers holding one fetch the
/// replacement instead. Concurrent creation of distinct clients may briefly
/// overshoot the bound.
pub struct InMemoryTrackerSource {
    trackers: DashMap<String, SharedTracker>,
    time_source: Arc<dyn TimeSource>,
    definitions: Arc<ThrottleDefinitionSet>,
    settings: TrackerStoreSettings,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl InMemoryTrackerSource {
    pub fn new(time_source: Arc<dyn TimeSource>, definitions: Arc<ThrottleDefinitionSet>) -> Self {
        Self::with_settings(time_source, definitions, TrackerStoreSettings::default())
    }

    pub fn with_settings(
        time_source: Arc<dyn TimeSource>,
        definitions: Arc<ThrottleDefinitionSet>,
        settings: TrackerStoreSettings,
    ) -> Self {
        let longest = longest_window(&definitions);
        let idle_ttl = if settings.idle_ttl < longest {
            warn!(
                idle_ttl_secs = settings.idle_ttl.as_secs_f64(),
                longest_window_secs = longest.as_secs_f64(),
                "Idle TTL shorter than the longest window, using the window length"
            );
            longest
        } else {
            settings.idle_ttl
        };
        let last_sweep = Mutex::new(time_source.now());

        Self {
            trackers: DashMap::new(),
            time_source,
            definitions,
            settings: TrackerStoreSettings {
                max_clients: settings.max_clients.max(1),
                idle_ttl,
                sweep_interval: settings.sweep_interval,
            },
            last_sweep,
        }
    }

    pub fn settings(&self) -> &TrackerStoreSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.trackers.contains_key(id)
    }

    /// Instant of the most recent idle sweep.
    pub fn last_sweep(&self) -> DateTime<Utc> {
        *self.last_sweep.lock()
    }

    /// Remove all trackers.
    pub fn clear(&self) {
        self.trackers.retain(|_, tracker| {
            tracker.lock().mark_evicted();
            false
        });
    }

    /// Remove trackers that have not been checked within the idle TTL.
    ///
    /// Returns the number of trackers removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.time_source.now();
        *self.last_sweep.lock() = now;

        let ttl = self.settings.idle_ttl.as_secs_f64();
        let before = self.trackers.len();
        self.trackers.retain(|_, tracker| {
            let mut tracker = tracker.lock();
            let keep = elapsed_seconds(tracker.last_check(), now) < ttl;
            if !keep {
                tracker.mark_evicted();
            }
            keep
        });
        let removed = before.saturating_sub(self.trackers.len());
        if removed > 0 {
            debug!(removed = removed, "Evicted idle allowance trackers");
        }
        removed
    }

    fn sweep_due(&self) -> bool {
        let now = self.time_source.now();
        let last_sweep = *self.last_sweep.lock();
        elapsed_seconds(last_sweep, now) >= self.settings.sweep_interval.as_secs_f64()
    }

    fn make_room(&self) {
        if self.trackers.len() < self.settings.max_clients {
            return;
        }
        if self.sweep_due()
            && self.evict_idle() > 0
            && self.trackers.len() < self.settings.max_clients
        {
            return;
        }
        self.evict_most_refilled();
    }

    fn evict_most_refilled(&self) {
        let now = self.time_source.now();
        let candidate = self
            .trackers
            .iter()
            .take(EVICTION_SAMPLE)
            .map(|entry| {
                let fraction = refill_fraction(&entry.value().lock(), &self.definitions, now);
                (entry.key().clone(), fraction)
            })
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        let Some((id, fraction)) = candidate else {
            return;
        };

        // Skip the eviction if the tracker was used since it was sampled.
        let removed = self.trackers.remove_if(&id, |_, tracker| {
            let mut tracker = tracker.lock();
            if refill_fraction(&tracker, &self.definitions, now) < fraction {
                return false;
            }
            tracker.mark_evicted();
            true
        });
        if removed.is_none() {
            return;
        }

        if fraction < 1.0 {
            warn!(
                client = %id,
                refill_fraction = fraction,
                "Evicting allowance tracker before its windows refilled"
            );
        } else {
            trace!(client = %id, "Evicting fully refilled allowance tracker");
        }
    }

    fn init_tracker(&self, id: &str) -> SharedTracker {
        let mut tracker = AllowanceTracker::new(id, self.time_source.now());
        for (interval, definition) in self.definitions.throttle_limits() {
            tracker.initialise_allowance(interval, definition.limit() as f64);
        }
        debug!(
            client = %id,
            windows = self.definitions.definition_count(),
            "Creating new allowance tracker"
        );
        Arc::new(Mutex::new(tracker))
    }
}

/// Length of the longest window in `definitions`.
fn longest_window(definitions: &ThrottleDefinitionSet) -> Duration {
    let longest = definitions
        .throttle_limits()
        .map(|(_, definition)| definition.per())
        .fold(0.0, f64::max);
    Duration::try_from_secs_f64(longest).unwrap_or(Duration::MAX)
}

/// How close `tracker` would be to full allowance at `now`, from 0 to 1.
///
/// The least refilled window decides.
fn refill_fraction(
    tracker: &AllowanceTracker,
    definitions: &ThrottleDefinitionSet,
    now: DateTime<Utc>,
) -> f64 {
    let elapsed = elapsed_seconds(tracker.last_check(), now);
    definitions
        .throttle_limits()
        .map(|(interval, definition)| {
            let limit = definition.limit() as f64;
            let current = tracker.allowance(interval).unwrap_or(limit);
            ((current + elapsed * definition.rate()) / limit).min(1.0)
        })
        .fold(1.0, f64::min)
}

impl AllowanceTrackerSource for InMemoryTrackerSource {
    fn allowance(&self, id: &str) -> Result<SharedTracker> {
        if id.is_empty() {
            return Err(ThrottlerError::InvalidCall("Id cannot be empty".to_string()));
        }

        if let Some(existing) = self.trackers.get(id) {
            return Ok(Arc::clone(existing.value()));
        }

        // No shard guard may be held while evicting.
        self.make_room();

        let tracker = self
            .trackers
            .entry(id.to_string())
            .or_insert_with(|| self.init_tracker(id));
        Ok(Arc::clone(tracker.value()))
    }

    fn peek(&self, id: &str) -> Option<SharedTracker> {
        self.trackers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn tracked_count(&self) -> usize {
        self.trackers.len()
    }
}

impl std::fmt::Debug for InMemoryTrackerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTrackerSource")
            .field("tracked", &self.trackers.len())
            .field("settings", &self.settings)
            .finish()
    }
}
