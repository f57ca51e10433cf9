//! Error types shared across the crate.
//!
//! [`ServiceError`] is the normalized failure report operations return to the
//! retry machinery. The remaining enums describe failures of the machinery
//! itself (executor outcomes, store faults, configuration mistakes).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coarse category stamped on a failure by the caller that observed it.
///
/// The classifier trusts `kind` first and only falls back to status codes and
/// message heuristics when the kind is [`ErrorKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operation did not complete in time.
    Timeout,
    /// The peer closed the connection mid-flight.
    ConnectionReset,
    /// Name resolution failed.
    Dns,
    /// Any other transport-level failure.
    Network,
    /// The service told us to slow down.
    RateLimited,
    /// The service is temporarily unable to respond.
    Unavailable,
    /// Authentication or authorization was rejected.
    Auth,
    /// The request payload failed validation.
    Validation,
    /// The request itself was malformed.
    MalformedRequest,
    /// Unclassified; downstream heuristics decide.
    Other,
}

/// Normalized failure from an external service call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    /// Caller-assigned category.
    pub kind: ErrorKind,
    /// Human-readable description, also used for pattern matching.
    pub message: String,
    /// Provider-specific error code, if the service supplied one.
    pub code: Option<String>,
    /// HTTP status of the response, if there was one.
    pub status: Option<u16>,
    /// Server-supplied wait hint, typically from a `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), code: None, status: None, retry_after: None }
    }

    /// Failure from an HTTP response with a status code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), ..Self::new(ErrorKind::Other, message) }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Terminal outcome of [`RetryExecutor::execute`](crate::RetryExecutor::execute)
/// when the operation did not succeed.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The circuit for this operation key is open; the call was not attempted.
    #[error("circuit open for operation '{key}'")]
    CircuitOpen { key: String },

    /// The failure was classified as non-retryable and is returned unchanged.
    #[error("non-retryable failure: {source}")]
    Fatal {
        #[source]
        source: ServiceError,
    },

    /// The caller's cancellation token fired before the operation succeeded.
    #[error("operation cancelled")]
    Cancelled,

    /// All retries were exhausted and the failure was captured for review.
    #[error("{attempts} attempts exhausted, captured as dead letter {entry_id}")]
    DeadLettered { entry_id: Uuid, attempts: u32 },

    /// Retries were exhausted and the dead letter store also failed.
    #[error("retries exhausted and dead letter capture failed: {source}")]
    DeadLetterFailed {
        #[source]
        source: StoreError,
    },
}

/// Dead letter store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dead letter entry not found: {id}")]
    NotFound { id: Uuid },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Notification channel failure. Never propagated past the dispatch site.
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Invalid component configuration, reported at construction time.
#[derive(Debug, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
