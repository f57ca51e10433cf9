//! Table-driven error classification.
//!
//! Decides once, up front, whether a [`ServiceError`] is worth retrying.
//! Precedence: explicit [`ErrorKind`], then HTTP status, then message and
//! code pattern matching, then fatal.

use crate::error::{ErrorKind, ServiceError};

/// Retry disposition of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient fault; retry with exponential backoff.
    Transient,
    /// Throttled by the service; retry after the advertised or default delay.
    RateLimited,
    /// Permanent fault; retrying cannot help.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

/// HTTP statuses retried by default.
pub const RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Lowercase substrings that mark an otherwise unclassified error transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "broken pipe",
    "dns",
    "network error",
    "temporary failure",
    "temporarily unavailable",
    "service unavailable",
    "try again",
    "econnreset",
    "etimedout",
];

/// Lowercase substrings that mark an error as throttling.
const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "too many requests", "quota exceeded"];

/// Stateless classifier over [`ServiceError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &ServiceError) -> ErrorClass {
        match error.kind {
            ErrorKind::RateLimited => return ErrorClass::RateLimited,
            ErrorKind::Timeout
            | ErrorKind::ConnectionReset
            | ErrorKind::Dns
            | ErrorKind::Network
            | ErrorKind::Unavailable => return ErrorClass::Transient,
            ErrorKind::Auth | ErrorKind::Validation | ErrorKind::MalformedRequest => {
                return ErrorClass::Fatal;
            }
            ErrorKind::Other => {}
        }

        if let Some(status) = error.status {
            if status == 429 {
                return ErrorClass::RateLimited;
            }
            if RETRYABLE_STATUSES.contains(&status) {
                return ErrorClass::Transient;
            }
            return ErrorClass::Fatal;
        }

        // A wait hint only makes sense from a throttling service.
        if error.retry_after.is_some() {
            return ErrorClass::RateLimited;
        }

        let haystack = match &error.code {
            Some(code) => format!("{} {}", error.message, code).to_lowercase(),
            None => error.message.to_lowercase(),
        };
        if RATE_LIMIT_PATTERNS.iter().any(|p| haystack.contains(p)) {
            return ErrorClass::RateLimited;
        }
        if TRANSIENT_PATTERNS.iter().any(|p| haystack.contains(p)) {
            return ErrorClass::Transient;
        }

        ErrorClass::Fatal
    }
}
