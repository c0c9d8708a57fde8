use crate::events::AlertEvent;
use std::future::Future;
use std::pin::Pin;

/// Outcome of one delivery attempt
///
/// Senders always resolve to a `SendResult`; no error type crosses the
/// sender boundary, so callers never need error handling to process an
/// outcome. `retryable` separates transient delivery failures (worth one
/// deferred retry) from configuration faults that can never succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    pub error: Option<String>,
    pub retryable: bool,
}

impl SendResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
            retryable: false,
        }
    }

    /// Transient delivery failure (non-2xx, timeout, transport fault)
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            retryable: true,
        }
    }

    /// Permanent failure caused by malformed or incomplete configuration
    pub fn config_failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            retryable: false,
        }
    }
}

/// Trait for channel sender implementations
///
/// A sender is a stateless adapter for one channel type: it parses the
/// channel's opaque JSON configuration, serializes one alert event into a
/// provider-specific payload and performs a single bounded-time outbound
/// call. Malformed configuration, provider rate limiting, timeouts and
/// transport faults all surface as descriptive `SendResult` errors.
pub trait ChannelSender: Send + Sync {
    /// Channel type tag this sender handles (matches `AlertChannel::channel_type`)
    fn channel_type(&self) -> &str;

    /// Deliver one alert event using the given channel configuration
    fn send<'a>(
        &'a self,
        event: &'a AlertEvent,
        config: &'a str,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_result_carries_no_error() {
        let result = SendResult::success();
        assert!(result.success);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_transient_failure_is_retryable() {
        let result = SendResult::failure("connection reset");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("connection reset"));
        assert!(result.retryable);
    }

    #[test]
    fn test_config_failure_is_not_retryable() {
        let result = SendResult::config_failure("missing webhook_url");
        assert!(!result.success);
        assert!(!result.retryable);
    }
}
