//! Time source abstraction.
//!
//! Every component that measures elapsed time (circuit breaker cooldowns,
//! rate limit windows) takes a [`Clock`] so tests can advance time
//! deterministically instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Monotonic and wall-clock time source.
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic instant, for measuring elapsed durations.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch, for bucketing wall-clock windows.
    fn millis_since_epoch(&self) -> u64;
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn millis_since_epoch(&self) -> u64 {
        (**self).millis_since_epoch()
    }
}

/// Production clock backed by [`Instant::now`] and [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn millis_since_epoch(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock for tests.
///
/// Starts at a fixed origin; both the monotonic instant and the epoch
/// milliseconds move only when [`advance`](MockClock::advance) is called.
/// Clones share the same underlying offset.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut elapsed = self.elapsed.lock();
        *elapsed = elapsed.saturating_add(delta);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Total time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn millis_since_epoch(&self) -> u64 {
        self.elapsed.lock().as_millis() as u64
    }
}
