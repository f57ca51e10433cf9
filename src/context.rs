//! Per-call metadata carried through the retry pipeline.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Per-resource quota enforced by the rate limiter.
///
/// Both windows are optional; an empty quota admits everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitQuota {
    /// Calls admitted per fixed one-minute window.
    pub per_minute: Option<u32>,
    /// Calls admitted per fixed one-hour window.
    pub per_hour: Option<u32>,
}

impl RateLimitQuota {
    pub fn per_minute(limit: u32) -> Self {
        Self { per_minute: Some(limit), per_hour: None }
    }

    pub fn per_hour(limit: u32) -> Self {
        Self { per_minute: None, per_hour: Some(limit) }
    }

    pub fn with_per_hour(mut self, limit: u32) -> Self {
        self.per_hour = Some(limit);
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.per_minute.is_none() && self.per_hour.is_none()
    }
}

/// Identity and provenance of one protected call.
///
/// `operation_key` scopes the circuit breaker, the rate limiter, and replay
/// handler lookup; everything else is diagnostics that travels into dead
/// letter entries. `payload` must contain enough serializable input to replay
/// the operation after a restart.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation_key: String,
    pub instance_id: Option<String>,
    pub user_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub rate_limit: Option<RateLimitQuota>,
    pub cancellation: Option<CancellationToken>,
}

impl OperationContext {
    pub fn new(operation_key: impl Into<String>) -> Self {
        Self {
            operation_key: operation_key.into(),
            instance_id: None,
            user_id: None,
            occurred_at: Utc::now(),
            payload: serde_json::Value::Null,
            rate_limit: None,
            cancellation: None,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_rate_limit(mut self, quota: RateLimitQuota) -> Self {
        self.rate_limit = Some(quota);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
