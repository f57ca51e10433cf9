//! Per-operation circuit breakers.
//!
//! One state machine per operation key, created lazily on first use. Each
//! key's state lives behind a [`DashMap`] entry guard, so a check or a
//! recorded outcome is atomic with respect to concurrent callers on the same
//! key. In particular the OPEN to HALF_OPEN transition happens inside
//! [`CircuitBreakerRegistry::is_open`], which means exactly one caller wins
//! the probe; everyone else keeps seeing the circuit as open until that
//! probe's outcome is recorded.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;

/// Circuit breaker tuning, shared by every key in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("failure_threshold must be greater than zero"));
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::new("cooldown must be greater than zero"));
        }
        Ok(())
    }
}

/// Observable state of one key's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One probe call is in flight; its outcome decides the next state.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
struct BreakerCell {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl Default for BreakerCell {
    fn default() -> Self {
        Self { state: BreakerState::Closed, consecutive_failures: 0, last_failure: None }
    }
}

/// Point-in-time view of one key's circuit, for dashboards and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub since_last_failure: Option<Duration>,
}

/// Registry of circuit breakers keyed by operation key.
pub struct CircuitBreakerRegistry<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    cells: DashMap<String, BreakerCell>,
    clock: Arc<C>,
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Registry with the default threshold of 5 and 60 second cooldown.
    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            cells: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl<C: Clock> CircuitBreakerRegistry<C> {
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<C>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, cells: DashMap::new(), clock })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Checks whether calls for `key` are currently rejected.
    ///
    /// When an open circuit's cooldown has elapsed this call transitions it
    /// to half-open and returns `false`, granting the caller the single
    /// probe attempt.
    pub fn is_open(&self, key: &str) -> bool {
        let mut cell = self.cells.entry(key.to_owned()).or_default();
        match cell.state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled_down = cell
                    .last_failure
                    .is_some_and(|at| self.clock.now().duration_since(at) > self.config.cooldown);
                if cooled_down {
                    cell.state = BreakerState::HalfOpen;
                    debug!(key, "circuit cooldown elapsed, granting half-open probe");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Records a successful call, closing the circuit for `key`.
    pub fn record_success(&self, key: &str) {
        let mut cell = self.cells.entry(key.to_owned()).or_default();
        if cell.state != BreakerState::Closed {
            info!(key, from = %cell.state, "circuit closed after successful call");
        }
        *cell = BreakerCell::default();
    }

    /// Records a failed call against `key`.
    ///
    /// Failures observed while the circuit is already open are ignored;
    /// rejected callers never invoked the operation, so there is nothing
    /// new to learn.
    pub fn record_failure(&self, key: &str) {
        let mut cell = self.cells.entry(key.to_owned()).or_default();
        match cell.state {
            BreakerState::Closed => {
                cell.consecutive_failures += 1;
                cell.last_failure = Some(self.clock.now());
                if cell.consecutive_failures >= self.config.failure_threshold {
                    cell.state = BreakerState::Open;
                    warn!(
                        key,
                        failures = cell.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                cell.state = BreakerState::Open;
                cell.last_failure = Some(self.clock.now());
                warn!(key, "half-open probe failed, circuit re-opened");
            }
            BreakerState::Open => {}
        }
    }

    /// Current state of `key`, or `None` if no call has touched it yet.
    pub fn snapshot(&self, key: &str) -> Option<BreakerSnapshot> {
        let cell = self.cells.get(key)?;
        Some(self.snapshot_cell(&cell))
    }

    /// States of every key the registry has seen.
    pub fn all_snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        self.cells
            .iter()
            .map(|entry| (entry.key().clone(), self.snapshot_cell(entry.value())))
            .collect()
    }

    /// Forces `key` back to closed with a zeroed failure count.
    pub fn reset(&self, key: &str) {
        if let Some(mut cell) = self.cells.get_mut(key) {
            if cell.state != BreakerState::Closed || cell.consecutive_failures > 0 {
                info!(key, "circuit manually reset");
            }
            *cell = BreakerCell::default();
        }
    }

    /// Resets every circuit in the registry.
    pub fn reset_all(&self) {
        for mut entry in self.cells.iter_mut() {
            *entry.value_mut() = BreakerCell::default();
        }
        info!("all circuits reset");
    }

    fn snapshot_cell(&self, cell: &BreakerCell) -> BreakerSnapshot {
        BreakerSnapshot {
            state: cell.state,
            consecutive_failures: cell.consecutive_failures,
            since_last_failure: cell.last_failure.map(|at| self.clock.now().duration_since(at)),
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("keys", &self.cells.len())
            .finish()
    }
}
