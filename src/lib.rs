//! Throttler - multi-window token bucket rate limiting
//!
//! This crate decides whether a client's request may proceed under several
//! usage limits enforced together, such as 15 requests per 15 seconds and
//! 1000 per day. Allowances refill continuously and are tracked per client
//! identifier in a bounded in-memory store.
//!
//! ```
//! use std::sync::Arc;
//! use throttler::throttling::{
//!     ManualTimeSource, ThrottleDefinitionSet, ThrottleInterval, Throttler, TokenBucketThrottler,
//! };
//!
//! let definitions = ThrottleDefinitionSet::with_units("requests")
//!     .add_definition(ThrottleInterval::QuarterMinute, 15)?
//!     .add_definition(ThrottleInterval::Day, 1000)?;
//! let clock = ManualTimeSource::at_epoch();
//! let throttler = TokenBucketThrottler::new(Arc::new(clock.clone()), definitions)?;
//!
//! assert!(throttler.proceed("api-key")?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod throttling;
