//! Bounded exponential backoff.

use std::time::Duration;

use sync_core::ProviderError;

/// Retry schedule for provider calls.
///
/// `max_attempts` counts the first call, so `3` means one call plus at most two
/// retries. The delay before retry `n` is `base_delay * 2^(n-1)`, capped at
/// `max_delay`. Whether an error is worth retrying is decided by `classifier`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub classifier: fn(&ProviderError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            classifier: ProviderError::is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_classifier(mut self, classifier: fn(&ProviderError) -> bool) -> Self {
        self.classifier = classifier;
        self
    }

    /// Delay to wait after `failed_attempts` consecutive failures (1-based).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The classifier's verdict on `error`.
    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        (self.classifier)(error)
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed with `error`.
    ///
    /// Returns the delay before the next attempt, or `None` to give up.
    pub fn next_delay(&self, attempt: u32, error: &ProviderError) -> Option<Duration> {
        if attempt >= self.max_attempts || !self.is_retryable(error) {
            return None;
        }
        Some(self.delay_for(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_base() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy =
            RetryPolicy::new(50, Duration::from_secs(1)).with_max_delay(Duration::from_secs(10));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let err = ProviderError::transient("429 Too Many Requests");
        assert_eq!(policy.next_delay(1, &err), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2, &err), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3, &err), None);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let err = ProviderError::permanent("401 invalid api key");
        assert_eq!(policy.next_delay(1, &err), None);
    }

    #[test]
    fn test_custom_classifier() {
        let policy = RetryPolicy::default().with_classifier(|_| false);
        assert_eq!(policy.next_delay(1, &ProviderError::transient("timeout")), None);
        assert!(!policy.is_retryable(&ProviderError::transient("timeout")));
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
