//! Error types for the throttler.

use thiserror::Error;

use crate::throttling::ThrottleInterval;

/// Main error type for throttler operations.
#[derive(Error, Debug)]
pub enum ThrottlerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid arguments supplied by the caller
    #[error("Invalid call: {0}")]
    InvalidCall(String),

    /// A throttling limit was reached
    #[error(transparent)]
    Throttling(#[from] ThrottlingError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while deciding whether a request may proceed.
///
/// `TooManyRequests` is the expected outcome when a usage limit is exceeded
/// and is meant to be matched on separately from programmer errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThrottlingError {
    /// The request did not fit in the allowance of `interval`.
    #[error("{message}")]
    TooManyRequests {
        interval: ThrottleInterval,
        message: String,
    },

    /// Empty client identifier or non-positive cost.
    #[error("Invalid call: {0}")]
    InvalidCall(String),

    /// The tracker store could not provide allowance state.
    #[error("Tracker store error: {0}")]
    Store(String),
}

impl ThrottlingError {
    /// Returns `true` if a usage limit was exceeded.
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, ThrottlingError::TooManyRequests { .. })
    }

    /// The window that rejected the request, if any.
    pub fn interval(&self) -> Option<ThrottleInterval> {
        match self {
            ThrottlingError::TooManyRequests { interval, .. } => Some(*interval),
            ThrottlingError::InvalidCall(_) | ThrottlingError::Store(_) => None,
        }
    }
}

/// Errors from a tracker store surface through `proceed`. Caller mistakes
/// stay `InvalidCall`; configuration and I/O failures become `Store`.
impl From<ThrottlerError> for ThrottlingError {
    fn from(err: ThrottlerError) -> Self {
        match err {
            ThrottlerError::Throttling(inner) => inner,
            ThrottlerError::InvalidCall(message) => ThrottlingError::InvalidCall(message),
            other @ (ThrottlerError::Config(_) | ThrottlerError::Io(_)) => {
                ThrottlingError::Store(other.to_string())
            }
        }
    }
}

/// Result type alias for throttler operations.
pub type Result<T> = std::result::Result<T, ThrottlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_requests_is_distinguishable() {
        let err = ThrottlingError::TooManyRequests {
            interval: ThrottleInterval::Day,
            message: "limit reached".to_string(),
        };
        assert!(err.is_too_many_requests());
        assert_eq!(err.interval(), Some(ThrottleInterval::Day));
        assert_eq!(err.to_string(), "limit reached");

        let err = ThrottlingError::InvalidCall("Id cannot be empty".to_string());
        assert!(!err.is_too_many_requests());
        assert_eq!(err.interval(), None);
    }

    #[test]
    fn test_invalid_call_converts_into_throttling_error() {
        let err = ThrottlerError::InvalidCall("Id cannot be empty".to_string());
        let converted = ThrottlingError::from(err);
        assert_eq!(
            converted,
            ThrottlingError::InvalidCall("Id cannot be empty".to_string())
        );
    }

    #[test]
    fn test_store_failures_are_not_invalid_calls() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "backend down");
        let converted = ThrottlingError::from(ThrottlerError::Io(io));
        assert_eq!(
            converted,
            ThrottlingError::Store("I/O error: backend down".to_string())
        );
        assert!(!converted.is_too_many_requests());
        assert_eq!(converted.interval(), None);

        let converted = ThrottlingError::from(ThrottlerError::Config("bad".to_string()));
        assert!(matches!(converted, ThrottlingError::Store(_)));
    }

    #[test]
    fn test_throttling_error_wraps_transparently() {
        let err: ThrottlerError = ThrottlingError::TooManyRequests {
            interval: ThrottleInterval::Hour,
            message: "too many".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "too many");
    }
}
