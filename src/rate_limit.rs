//! Fixed-window advisory rate limiting.
//!
//! Counts admissions per resource in fixed one-minute and one-hour windows
//! keyed by `floor(now_ms / window_ms)`. [`RateLimiter::acquire`] never
//! rejects; a caller over budget sleeps until the next window boundary and
//! tries again, so work is delayed rather than dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::context::RateLimitQuota;

pub(crate) const MINUTE_WINDOW_MS: u64 = 60_000;
pub(crate) const HOUR_WINDOW_MS: u64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    resource: String,
    window_ms: u64,
    bucket: u64,
}

/// Current admission counts for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCounts {
    pub this_minute: u64,
    pub this_hour: u64,
}

/// Shared fixed-window rate limiter.
pub struct RateLimiter<C: Clock = SystemClock> {
    windows: Mutex<HashMap<WindowKey, u64>>,
    clock: Arc<C>,
}

impl RateLimiter<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl Default for RateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(clock: Arc<C>) -> Self {
        Self { windows: Mutex::new(HashMap::new()), clock }
    }

    /// Waits until `resource` has budget under `quota`, then records the
    /// admission. Returns immediately when the quota is empty or not yet
    /// exhausted.
    pub async fn acquire(&self, resource: &str, quota: &RateLimitQuota) {
        loop {
            match self.try_reserve(resource, quota) {
                Ok(()) => return,
                Err(wait) => {
                    debug!(
                        resource,
                        wait_ms = wait.as_millis() as u64,
                        "rate limit window exhausted, sleeping until next boundary"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Single check-and-increment step.
    ///
    /// On success both tracked window counters are bumped in the same
    /// critical section, so concurrent callers cannot overshoot a limit.
    /// On failure returns how long to wait for the earliest exhausted
    /// window to roll over.
    pub fn try_reserve(&self, resource: &str, quota: &RateLimitQuota) -> Result<(), Duration> {
        if quota.is_empty() {
            return Ok(());
        }

        let now_ms = self.clock.millis_since_epoch();
        let limits = [
            (MINUTE_WINDOW_MS, quota.per_minute),
            (HOUR_WINDOW_MS, quota.per_hour),
        ];

        let mut windows = self.windows.lock();
        for (window_ms, limit) in limits {
            let Some(limit) = limit else { continue };
            let bucket = now_ms / window_ms;
            let key = WindowKey { resource: resource.to_owned(), window_ms, bucket };
            let count = windows.get(&key).copied().unwrap_or(0);
            if count >= u64::from(limit) {
                let boundary_ms = (bucket + 1) * window_ms;
                return Err(Duration::from_millis(boundary_ms - now_ms));
            }
        }
        for (window_ms, limit) in limits {
            if limit.is_none() {
                continue;
            }
            let key = WindowKey { resource: resource.to_owned(), window_ms, bucket: now_ms / window_ms };
            *windows.entry(key).or_insert(0) += 1;
        }
        Self::purge_stale(&mut windows, now_ms);
        Ok(())
    }

    /// Admission counts for the current minute and hour buckets.
    pub fn counts(&self, resource: &str) -> WindowCounts {
        let now_ms = self.clock.millis_since_epoch();
        let windows = self.windows.lock();
        let lookup = |window_ms: u64| {
            let key = WindowKey {
                resource: resource.to_owned(),
                window_ms,
                bucket: now_ms / window_ms,
            };
            windows.get(&key).copied().unwrap_or(0)
        };
        WindowCounts { this_minute: lookup(MINUTE_WINDOW_MS), this_hour: lookup(HOUR_WINDOW_MS) }
    }

    /// Drops buckets more than one window behind the current one, keeping
    /// memory bounded by the number of active resources.
    fn purge_stale(windows: &mut HashMap<WindowKey, u64>, now_ms: u64) {
        windows.retain(|key, _| now_ms / key.window_ms <= key.bucket + 1);
    }
}

impl<C: Clock> std::fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("tracked_windows", &self.windows.lock().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::clock::MockClock;

    fn limiter(clock: &MockClock) -> RateLimiter<MockClock> {
        RateLimiter::with_clock(Arc::new(clock.clone()))
    }

    #[test]
    fn empty_quota_always_admits() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        for _ in 0..1000 {
            assert!(limiter.try_reserve("mail", &RateLimitQuota::default()).is_ok());
        }
    }

    #[test]
    fn minute_window_fills_and_reports_wait_to_boundary() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        let quota = RateLimitQuota::per_minute(3);

        clock.advance_millis(10_000);
        for _ in 0..3 {
            assert!(limiter.try_reserve("mail", &quota).is_ok());
        }
        let wait = limiter.try_reserve("mail", &quota).expect_err("window is full");
        assert_eq!(wait, Duration::from_millis(50_000));
    }

    #[test]
    fn window_rolls_over_at_the_boundary() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        let quota = RateLimitQuota::per_minute(2);

        assert!(limiter.try_reserve("mail", &quota).is_ok());
        assert!(limiter.try_reserve("mail", &quota).is_ok());
        assert!(limiter.try_reserve("mail", &quota).is_err());

        clock.advance_millis(MINUTE_WINDOW_MS);
        assert!(limiter.try_reserve("mail", &quota).is_ok());
    }

    #[test]
    fn hour_window_outlives_minute_windows() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        let quota = RateLimitQuota::per_minute(10).with_per_hour(3);

        for _ in 0..3 {
            assert!(limiter.try_reserve("mail", &quota).is_ok());
            clock.advance_millis(MINUTE_WINDOW_MS);
        }
        let wait = limiter.try_reserve("mail", &quota).expect_err("hour budget spent");
        assert_eq!(wait, Duration::from_millis(HOUR_WINDOW_MS - 3 * MINUTE_WINDOW_MS));
    }

    #[test]
    fn resources_are_tracked_independently() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        let quota = RateLimitQuota::per_minute(1);

        assert!(limiter.try_reserve("mail", &quota).is_ok());
        assert!(limiter.try_reserve("mail", &quota).is_err());
        assert!(limiter.try_reserve("ai", &quota).is_ok());
    }

    #[test]
    fn counts_reflect_current_buckets() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        let quota = RateLimitQuota::per_minute(10).with_per_hour(100);

        for _ in 0..4 {
            assert!(limiter.try_reserve("mail", &quota).is_ok());
        }
        assert_eq!(limiter.counts("mail"), WindowCounts { this_minute: 4, this_hour: 4 });

        clock.advance_millis(MINUTE_WINDOW_MS);
        assert_eq!(limiter.counts("mail"), WindowCounts { this_minute: 0, this_hour: 4 });
    }

    #[test]
    fn stale_buckets_are_purged() {
        let clock = MockClock::new();
        let limiter = limiter(&clock);
        let quota = RateLimitQuota::per_minute(5);

        assert!(limiter.try_reserve("mail", &quota).is_ok());
        clock.advance_millis(3 * MINUTE_WINDOW_MS);
        assert!(limiter.try_reserve("mail", &quota).is_ok());

        // Only the current minute bucket survives.
        assert_eq!(limiter.windows.lock().len(), 1);
    }

    #[test]
    fn concurrent_callers_cannot_overshoot_the_limit() {
        let clock = MockClock::new();
        let limiter = Arc::new(limiter(&clock));
        let quota = RateLimitQuota::per_minute(5);
        let admitted = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            handles.push(std::thread::spawn(move || {
                if limiter.try_reserve("shared", &quota).is_ok() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn acquire_returns_immediately_under_budget() {
        let limiter = RateLimiter::new();
        let quota = RateLimitQuota::per_minute(100);
        for _ in 0..10 {
            limiter.acquire("mail", &quota).await;
        }
        assert_eq!(limiter.counts("mail").this_minute, 10);
    }
}
