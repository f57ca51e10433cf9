//! Retry policy and backoff delay computation.
//!
//! The delay function is pure: given the same attempt number, error, policy,
//! and RNG it always produces the same duration, so tests can assert exact
//! values with a seeded RNG or bounds with jitter enabled.

use std::time::Duration;

use rand::Rng;

use crate::error::{ConfigError, ServiceError};

/// Delays never drop below this, jitter included.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Caps `2^attempt` so the multiplication cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Fraction of the computed delay used as the jitter half-range.
const JITTER_FACTOR: f64 = 0.1;

/// Per-call retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// First backoff delay; doubles each retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
    /// Apply uniform noise of ±10% to each computed delay.
    pub jitter: bool,
    /// Minimum wait after a throttling response, even when the server's
    /// `Retry-After` hint is shorter.
    pub rate_limit_delay: Duration,
    /// Overall wall-clock budget for the whole call, retries included.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: true,
            rate_limit_delay: Duration::from_millis(1000),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_rate_limit_delay(mut self, rate_limit_delay: Duration) -> Self {
        self.rate_limit_delay = rate_limit_delay;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Rejects policies that would loop forever or never back off.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::new("base_delay must be greater than zero"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::new("max_delay must be at least base_delay"));
        }
        if let Some(deadline) = self.deadline {
            if deadline.is_zero() {
                return Err(ConfigError::new("deadline must be greater than zero"));
            }
        }
        Ok(())
    }
}

/// Delay before retry number `attempt` (zero-based), using the thread RNG
/// for jitter.
pub fn delay_for(attempt: u32, error: &ServiceError, policy: &RetryPolicy) -> Duration {
    delay_with_rng(attempt, error, policy, &mut rand::thread_rng())
}

/// Delay before retry number `attempt`, with an injected RNG.
///
/// A server `Retry-After` hint overrides exponential backoff entirely and is
/// raised to at least `policy.rate_limit_delay`. Everything is floored at
/// [`MIN_RETRY_DELAY`].
pub fn delay_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    error: &ServiceError,
    policy: &RetryPolicy,
    rng: &mut R,
) -> Duration {
    if let Some(hint) = error.retry_after {
        return hint.max(policy.rate_limit_delay).max(MIN_RETRY_DELAY);
    }

    let base = exponential_delay(attempt, policy);
    let delayed = if policy.jitter { apply_jitter(base, rng) } else { base };
    delayed.max(MIN_RETRY_DELAY)
}

/// `min(base_delay * 2^attempt, max_delay)` with saturating arithmetic.
fn exponential_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
    let multiplier = 2u64.saturating_pow(exponent);
    let base_ms = policy.base_delay.as_millis() as u64;
    let delay_ms = base_ms.saturating_mul(multiplier);
    Duration::from_millis(delay_ms).min(policy.max_delay)
}

fn apply_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let delay_ms = delay.as_millis() as f64;
    let half_range = delay_ms * JITTER_FACTOR;
    if half_range <= 0.0 {
        return delay;
    }
    let offset = rng.gen_range(-half_range..=half_range);
    Duration::from_millis((delay_ms + offset).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::error::ErrorKind;

    fn transient() -> ServiceError {
        ServiceError::new(ErrorKind::Timeout, "deadline exceeded")
    }

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy::new().with_jitter(false)
    }

    #[test]
    fn delays_double_until_the_cap() {
        let policy = policy_without_jitter();
        let err = transient();
        let mut rng = StdRng::seed_from_u64(7);

        let expected = [1000u64, 2000, 4000, 8000, 16_000, 30_000, 30_000];
        for (attempt, &ms) in expected.iter().enumerate() {
            let delay = delay_with_rng(attempt as u32, &err, &policy, &mut rng);
            assert_eq!(delay, Duration::from_millis(ms), "attempt {attempt}");
        }
    }

    #[test]
    fn delay_is_floored_at_100ms() {
        let policy = policy_without_jitter().with_base_delay(Duration::from_millis(1));
        let mut rng = StdRng::seed_from_u64(7);
        let delay = delay_with_rng(0, &transient(), &policy, &mut rng);
        assert_eq!(delay, MIN_RETRY_DELAY);
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = policy_without_jitter().with_max_delay(Duration::from_secs(300));
        let mut rng = StdRng::seed_from_u64(7);
        let delay = delay_with_rng(u32::MAX, &transient(), &policy, &mut rng);
        assert_eq!(delay, Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::new();
        let err = transient();
        let mut rng = StdRng::seed_from_u64(42);

        for attempt in 0..4u32 {
            let base = exponential_delay(attempt, &policy).as_millis() as f64;
            for _ in 0..200 {
                let delay = delay_with_rng(attempt, &err, &policy, &mut rng).as_millis() as f64;
                assert!(delay >= base * 0.9 - 1.0, "attempt {attempt}: {delay} below band");
                assert!(delay <= base * 1.1 + 1.0, "attempt {attempt}: {delay} above band");
            }
        }
    }

    #[test]
    fn jitter_is_deterministic_with_a_seeded_rng() {
        let policy = RetryPolicy::new();
        let err = transient();
        let a = delay_with_rng(2, &err, &policy, &mut StdRng::seed_from_u64(99));
        let b = delay_with_rng(2, &err, &policy, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn retry_after_hint_overrides_exponential_backoff() {
        let policy = policy_without_jitter();
        let err = transient().with_retry_after(Duration::from_secs(7));
        let mut rng = StdRng::seed_from_u64(7);

        // Attempt number is irrelevant once the server supplied a hint.
        for attempt in [0u32, 3, 10] {
            let delay = delay_with_rng(attempt, &err, &policy, &mut rng);
            assert_eq!(delay, Duration::from_secs(7));
        }
    }

    #[test]
    fn short_retry_after_is_raised_to_rate_limit_delay() {
        let policy = policy_without_jitter().with_rate_limit_delay(Duration::from_millis(1500));
        let err = transient().with_retry_after(Duration::from_millis(200));
        let mut rng = StdRng::seed_from_u64(7);
        let delay = delay_with_rng(0, &err, &policy, &mut rng);
        assert_eq!(delay, Duration::from_millis(1500));
    }

    #[test]
    fn validate_rejects_zero_base_delay() {
        let policy = RetryPolicy::new().with_base_delay(Duration::ZERO);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn validate_rejects_max_below_base() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn default_policy_is_valid() {
        assert!(RetryPolicy::default().validate().is_ok());
    }
}
