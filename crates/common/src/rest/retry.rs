use std::time::Duration;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// How transient failures (429 / 5xx) are retried.
///
/// By default there is no attempt ceiling: long running transfers
///  keep going through outages and callers supervise them. Set
///  `max_attempts` to bound it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    /// Base delay before retrying, doubled per attempt
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Whether another attempt is allowed after `attempts` failed ones
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Delay before the retry following `attempts` failed attempts
    pub fn delay(&self, attempts: u32) -> Duration {
        retry_delay(attempts.saturating_sub(1), self.backoff_base).min(self.backoff_cap)
    }
}

/// Exponential backoff: `base * 2^retry_count`, saturating
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(retry_count);
    base.saturating_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_delay(0, base), Duration::from_millis(100));
        assert_eq!(retry_delay(1, base), Duration::from_millis(200));
        assert_eq!(retry_delay(3, base), Duration::from_millis(800));
        // saturates instead of panicking
        assert!(retry_delay(64, base) > Duration::from_secs(1));
    }

    #[test]
    fn test_policy_ceiling() {
        let unbounded = RetryPolicy::default();
        assert!(unbounded.allows(1_000_000));

        let bounded = RetryPolicy::default().with_max_attempts(Some(3));
        assert!(bounded.allows(2));
        assert!(!bounded.allows(3));
    }

    #[test]
    fn test_policy_delay_is_capped() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(10), Duration::from_secs(5));
    }
}
