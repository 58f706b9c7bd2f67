//! Policies deciding what happens when a window's allowance is exceeded.

use tracing::warn;

use super::definition::ThrottleLimitDefinition;
use super::interval::ThrottleInterval;
use crate::error::ThrottlingError;

/// Details of a window that could not accommodate a request.
#[derive(Debug, Clone, Copy)]
pub struct LimitExceeded<'a> {
    pub client_id: &'a str,
    pub interval: ThrottleInterval,
    pub definition: &'a ThrottleLimitDefinition,
    /// Allowance after refill, before the rejected debit
    pub allowance: f64,
    pub requested: f64,
}

/// Outcome chosen by a policy that does not raise an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through this window without debiting it.
    Admit,
    /// Reject the request without raising an error.
    Deny,
}

/// Strategy invoked by the throttler when a window rejects a request.
pub trait RejectionPolicy: Send + Sync {
    /// Human-readable message describing the exceeded limit.
    fn exceeded_message(&self, exceeded: &LimitExceeded<'_>) -> String {
        default_message(exceeded)
    }

    fn on_exceeded(
        &self,
        exceeded: &LimitExceeded<'_>,
        message: String,
    ) -> Result<Verdict, ThrottlingError>;
}

/// Message used by the built-in policies.
pub fn default_message(exceeded: &LimitExceeded<'_>) -> String {
    format!(
        "Usage limit of {} {} per {} exceeded for client {}",
        exceeded.definition.limit(),
        exceeded.definition.units(),
        exceeded.interval,
        exceeded.client_id
    )
}

impl<F> RejectionPolicy for F
where
    F: Fn(&LimitExceeded<'_>, String) -> Result<Verdict, ThrottlingError> + Send + Sync,
{
    fn on_exceeded(
        &self,
        exceeded: &LimitExceeded<'_>,
        message: String,
    ) -> Result<Verdict, ThrottlingError> {
        self(exceeded, message)
    }
}

/// Logs the exceeded limit and raises [`ThrottlingError::TooManyRequests`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TooManyRequestsPolicy;

impl RejectionPolicy for TooManyRequestsPolicy {
    fn on_exceeded(
        &self,
        exceeded: &LimitExceeded<'_>,
        message: String,
    ) -> Result<Verdict, ThrottlingError> {
        log_exceeded(exceeded, &message);
        Err(ThrottlingError::TooManyRequests {
            interval: exceeded.interval,
            message,
        })
    }
}

/// Silently rejects the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyPolicy;

impl RejectionPolicy for DenyPolicy {
    fn on_exceeded(&self, _: &LimitExceeded<'_>, _: String) -> Result<Verdict, ThrottlingError> {
        Ok(Verdict::Deny)
    }
}

/// Logs the exceeded limit and rejects the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPolicy;

impl RejectionPolicy for LoggingPolicy {
    fn on_exceeded(
        &self,
        exceeded: &LimitExceeded<'_>,
        message: String,
    ) -> Result<Verdict, ThrottlingError> {
        log_exceeded(exceeded, &message);
        Ok(Verdict::Deny)
    }
}

fn log_exceeded(exceeded: &LimitExceeded<'_>, message: &str) {
    warn!(
        client = %exceeded.client_id,
        interval = %exceeded.interval,
        allowance = exceeded.allowance,
        requested = exceeded.requested,
        "{}", message
    );
}

/// Never rejects. Windows that are exceeded are left undebited.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowPolicy;

impl RejectionPolicy for AllowPolicy {
    fn on_exceeded(&self, _: &LimitExceeded<'_>, _: String) -> Result<Verdict, ThrottlingError> {
        Ok(Verdict::Admit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exceeded(definition: &ThrottleLimitDefinition) -> LimitExceeded<'_> {
        LimitExceeded {
            client_id: "api-key-1",
            interval: ThrottleInterval::QuarterMinute,
            definition,
            allowance: 0.5,
            requested: 1.0,
        }
    }

    #[test]
    fn test_default_message() {
        let definition = ThrottleLimitDefinition::new(15, 15.0, "requests").unwrap();
        let exceeded = exceeded(&definition);
        assert_eq!(
            TooManyRequestsPolicy.exceeded_message(&exceeded),
            "Usage limit of 15 requests per 15 seconds exceeded for client api-key-1"
        );
    }

    #[test]
    fn test_too_many_requests_policy_raises() {
        let definition = ThrottleLimitDefinition::new(15, 15.0, "requests").unwrap();
        let exceeded = exceeded(&definition);
        let err = TooManyRequestsPolicy
            .on_exceeded(&exceeded, "limit".to_string())
            .unwrap_err();
        assert_eq!(
            err,
            ThrottlingError::TooManyRequests {
                interval: ThrottleInterval::QuarterMinute,
                message: "limit".to_string(),
            }
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_too_many_requests_policy_logs_warning() {
        let definition = ThrottleLimitDefinition::new(15, 15.0, "requests").unwrap();
        let exceeded = exceeded(&definition);
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            TooManyRequestsPolicy.on_exceeded(&exceeded, "daily quota used up".to_string())
        });

        assert!(result.unwrap_err().is_too_many_requests());
        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("daily quota used up"));
        assert!(output.contains("api-key-1"));
    }

    #[test]
    fn test_non_raising_policies() {
        let definition = ThrottleLimitDefinition::new(15, 15.0, "requests").unwrap();
        let exceeded = exceeded(&definition);
        assert_eq!(DenyPolicy.on_exceeded(&exceeded, String::new()), Ok(Verdict::Deny));
        assert_eq!(LoggingPolicy.on_exceeded(&exceeded, String::new()), Ok(Verdict::Deny));
        assert_eq!(AllowPolicy.on_exceeded(&exceeded, String::new()), Ok(Verdict::Admit));
    }

    fn reject_large_requests(
        exceeded: &LimitExceeded<'_>,
        _message: String,
    ) -> Result<Verdict, ThrottlingError> {
        if exceeded.requested > 10.0 {
            Ok(Verdict::Deny)
        } else {
            Err(ThrottlingError::InvalidCall("custom".to_string()))
        }
    }

    #[test]
    fn test_function_policy() {
        let definition = ThrottleLimitDefinition::new(15, 15.0, "requests").unwrap();
        let exceeded = exceeded(&definition);
        let policy: &dyn RejectionPolicy = &reject_large_requests;
        assert_eq!(
            policy.on_exceeded(&exceeded, String::new()),
            Err(ThrottlingError::InvalidCall("custom".to_string()))
        );
        assert!(policy.exceeded_message(&exceeded).contains("api-key-1"));
    }
}
