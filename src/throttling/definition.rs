//! Limit definitions and the ordered set of windows enforced together.

use std::fmt;

use super::interval::ThrottleInterval;
use crate::error::{Result, ThrottlerError};

/// Units label used when none is given.
pub const DEFAULT_UNITS: &str = "units";

/// An event or resource-unit limit per time span.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleLimitDefinition {
    /// Units allowed per time span
    limit: u32,
    /// Time span in seconds
    per: f64,
    /// Display label for the units being counted
    units: String,
    /// Cached `limit / per`
    rate: f64,
}

impl ThrottleLimitDefinition {
    /// Create a definition allowing `limit` units every `per` seconds.
    ///
    /// Fails if `limit` is zero or `per` is not a positive, finite number.
    pub fn new(limit: u32, per: f64, units: impl Into<String>) -> Result<Self> {
        validate_limit(limit)?;
        validate_per(per)?;
        Ok(Self {
            limit,
            per,
            units: units.into(),
            rate: limit as f64 / per,
        })
    }

    /// Create a definition using the default units label.
    pub fn with_default_units(limit: u32, per: f64) -> Result<Self> {
        Self::new(limit, per, DEFAULT_UNITS)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn per(&self) -> f64 {
        self.per
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    /// Units replenished per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Adjust the limit of an existing definition.
    pub fn set_limit(&mut self, limit: u32) -> Result<()> {
        validate_limit(limit)?;
        self.limit = limit;
        self.rate = self.limit as f64 / self.per;
        Ok(())
    }

    /// Adjust the time span of an existing definition.
    pub fn set_per(&mut self, per: f64) -> Result<()> {
        validate_per(per)?;
        self.per = per;
        self.rate = self.limit as f64 / self.per;
        Ok(())
    }

    pub fn set_units(&mut self, units: impl Into<String>) {
        self.units = units.into();
    }
}

impl fmt::Display for ThrottleLimitDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} per {}s (rate {:.4}/s)",
            self.limit, self.units, self.per, self.rate
        )
    }
}

fn validate_limit(limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(ThrottlerError::Config(format!(
            "Limit must be > 0 but was {}",
            limit
        )));
    }
    Ok(())
}

fn validate_per(per: f64) -> Result<()> {
    if !(per.is_finite() && per > 0.0) {
        return Err(ThrottlerError::Config(format!(
            "per must be > 0 seconds but was {}",
            per
        )));
    }
    Ok(())
}

/// All throttle windows that are enforced together, in evaluation order.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleDefinitionSet {
    units: String,
    /// Insertion-ordered; windows are checked and debited in this order
    definitions: Vec<(ThrottleInterval, ThrottleLimitDefinition)>,
}

impl ThrottleDefinitionSet {
    /// Create an empty set counting the default units.
    pub fn new() -> Self {
        Self::with_units(DEFAULT_UNITS)
    }

    /// Create an empty set whose definitions are labelled with `units`.
    pub fn with_units(units: impl Into<String>) -> Self {
        Self {
            units: units.into(),
            definitions: Vec::new(),
        }
    }

    /// Add a limit for `interval` using the interval's own period.
    ///
    /// Re-adding an interval replaces its definition in place.
    pub fn add_definition(mut self, interval: ThrottleInterval, limit: u32) -> Result<Self> {
        let definition =
            ThrottleLimitDefinition::new(limit, interval.seconds() as f64, self.units.clone())?;
        self.insert_definition(interval, definition);
        Ok(self)
    }

    /// Insert an explicitly constructed definition for `interval`.
    pub fn insert_definition(
        &mut self,
        interval: ThrottleInterval,
        definition: ThrottleLimitDefinition,
    ) {
        match self.definitions.iter_mut().find(|(i, _)| *i == interval) {
            Some((_, existing)) => *existing = definition,
            None => self.definitions.push((interval, definition)),
        }
    }

    /// Read-only view of the configured windows in evaluation order.
    pub fn throttle_limits(
        &self,
    ) -> impl ExactSizeIterator<Item = (ThrottleInterval, &ThrottleLimitDefinition)> + '_ {
        self.definitions.iter().map(|(interval, def)| (*interval, def))
    }

    pub fn throttle_definition(
        &self,
        interval: ThrottleInterval,
    ) -> Option<&ThrottleLimitDefinition> {
        self.definitions
            .iter()
            .find(|(i, _)| *i == interval)
            .map(|(_, def)| def)
    }

    /// Mutable access for adjusting a definition while the set is being built.
    pub fn throttle_definition_mut(
        &mut self,
        interval: ThrottleInterval,
    ) -> Option<&mut ThrottleLimitDefinition> {
        self.definitions
            .iter_mut()
            .find(|(i, _)| *i == interval)
            .map(|(_, def)| def)
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn units(&self) -> &str {
        &self.units
    }
}

impl Default for ThrottleDefinitionSet {
    fn default() -> Self {
        Self::new()
    }
}
