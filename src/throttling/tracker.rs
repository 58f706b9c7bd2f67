//! Per-client allowance state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::interval::ThrottleInterval;

/// Remaining allowances of a single client, one per configured window.
#[derive(Debug, Clone)]
pub struct AllowanceTracker {
    client_id: String,
    last_check: DateTime<Utc>,
    allowances: HashMap<ThrottleInterval, f64>,
    /// Set once the store has dropped this tracker
    evicted: bool,
}

impl AllowanceTracker {
    pub fn new(client_id: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            last_check: created,
            allowances: HashMap::new(),
            evicted: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn last_check(&self) -> DateTime<Utc> {
        self.last_check
    }

    /// Record an evaluation at `instant`. Earlier instants are ignored.
    pub fn record_check(&mut self, instant: DateTime<Utc>) {
        if instant > self.last_check {
            self.last_check = instant;
        }
    }

    /// Whether the store has dropped this tracker.
    ///
    /// Callers still holding an evicted tracker must fetch a fresh one so
    /// that one client never has two live trackers.
    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    /// Set the starting allowance for `interval` unless one already exists.
    pub fn initialise_allowance(&mut self, interval: ThrottleInterval, allowance: f64) {
        self.allowances.entry(interval).or_insert(allowance);
    }

    /// Current allowance for `interval`, if the window is tracked.
    pub fn allowance(&self, interval: ThrottleInterval) -> Option<f64> {
        self.allowances.get(&interval).copied()
    }

    /// Store a new allowance for `interval`, clamped at zero.
    pub fn set_allowance(&mut self, interval: ThrottleInterval, allowance: f64) {
        self.allowances.insert(interval, allowance.max(0.0));
    }

    /// Debit `amount` from `current` and store the result.
    ///
    /// Returns the stored allowance.
    pub fn decrement_allowance(
        &mut self,
        interval: ThrottleInterval,
        current: f64,
        amount: f64,
    ) -> f64 {
        let remaining = (current - amount).max(0.0);
        self.allowances.insert(interval, remaining);
        remaining
    }
}

impl PartialEq for AllowanceTracker {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id
    }
}

impl Eq for AllowanceTracker {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_initialise_allowance_keeps_existing_value() {
        let mut tracker = AllowanceTracker::new("client", DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(tracker.allowance(ThrottleInterval::Hour), None);

        tracker.initialise_allowance(ThrottleInterval::Hour, 100.0);
        tracker.set_allowance(ThrottleInterval::Hour, 42.0);
        tracker.initialise_allowance(ThrottleInterval::Hour, 100.0);
        assert_eq!(tracker.allowance(ThrottleInterval::Hour), Some(42.0));
    }

    #[test]
    fn test_decrement_allowance() {
        let mut tracker = AllowanceTracker::new("client", DateTime::<Utc>::UNIX_EPOCH);
        tracker.initialise_allowance(ThrottleInterval::Day, 10.0);

        let remaining = tracker.decrement_allowance(ThrottleInterval::Day, 10.0, 2.5);
        assert_eq!(remaining, 7.5);
        assert_eq!(tracker.allowance(ThrottleInterval::Day), Some(7.5));
    }

    #[test]
    fn test_allowance_never_negative() {
        let mut tracker = AllowanceTracker::new("client", DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(tracker.decrement_allowance(ThrottleInterval::Day, 1.0, 3.0), 0.0);
        tracker.set_allowance(ThrottleInterval::Hour, -5.0);
        assert_eq!(tracker.allowance(ThrottleInterval::Hour), Some(0.0));
    }

    #[test]
    fn test_last_check_only_moves_forward() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let mut tracker = AllowanceTracker::new("client", start);

        tracker.record_check(start + TimeDelta::seconds(10));
        tracker.record_check(start + TimeDelta::seconds(5));
        assert_eq!(tracker.last_check(), start + TimeDelta::seconds(10));
    }

    #[test]
    fn test_evicted_flag() {
        let mut tracker = AllowanceTracker::new("client", DateTime::<Utc>::UNIX_EPOCH);
        assert!(!tracker.is_evicted());
        tracker.mark_evicted();
        assert!(tracker.is_evicted());
    }

    #[test]
    fn test_equality_by_client_id() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let mut a = AllowanceTracker::new("client", start);
        a.set_allowance(ThrottleInterval::Day, 3.0);
        let b = AllowanceTracker::new("client", start + TimeDelta::seconds(1));
        assert_eq!(a, b);
        assert_ne!(a, AllowanceTracker::new("other", start));
    }
}
