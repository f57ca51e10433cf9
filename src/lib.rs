//! Resilience layer for calls to unreliable external services.
//!
//! `backstop` wraps an async operation with the machinery needed to survive
//! a flaky dependency: table-driven error classification, exponential
//! backoff with jitter, per-operation circuit breakers, advisory
//! fixed-window rate limiting, and a durable dead letter queue for failures
//! that exhaust their retries.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use backstop::{
//!     ErrorKind, OperationContext, RetryExecutor, RetryPolicy, ServiceError,
//!     SqliteDeadLetterStore,
//! };
//!
//! # async fn send_mail() -> Result<(), ServiceError> { Ok(()) }
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteDeadLetterStore::open("dead_letters.db")?);
//! let executor = RetryExecutor::new(store);
//!
//! let ctx = OperationContext::new("mail.send")
//!     .with_payload(serde_json::json!({"to": "ops@example.com"}));
//! executor.execute(&ctx, &RetryPolicy::default(), || send_mail()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod breaker;
pub mod classify;
pub mod clock;
pub mod context;
pub mod dead_letter;
pub mod error;
pub mod executor;
pub mod rate_limit;

pub use backoff::{RetryPolicy, MIN_RETRY_DELAY};
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreakerConfig, CircuitBreakerRegistry};
pub use classify::{ErrorClass, ErrorClassifier};
pub use clock::{Clock, MockClock, SystemClock};
pub use context::{OperationContext, RateLimitQuota};
pub use dead_letter::{
    DeadLetterEntry, DeadLetterNotifier, DeadLetterService, DeadLetterStore, EntryFilter,
    EntryPatch, EntryStatus, LogNotifier, MemoryDeadLetterStore, ReplayError, ReplayHandler,
    ReplayOutcome, SqliteDeadLetterStore,
};
pub use error::{ConfigError, ErrorKind, ExecuteError, NotifyError, ServiceError, StoreError};
pub use executor::{RetryExecutor, RetryExecutorBuilder};
pub use rate_limit::{RateLimiter, WindowCounts};
