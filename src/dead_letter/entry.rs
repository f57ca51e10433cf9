//! Dead letter entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::OperationContext;
use crate::error::ServiceError;

/// Review lifecycle of a captured failure.
///
/// Entries are only ever status-transitioned, never deleted, so the store
/// doubles as an audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Freshly captured, waiting for an operator.
    PendingReview,
    /// A replay is in flight.
    Retrying,
    /// Replay succeeded.
    Resolved,
    /// Replay failed or was impossible.
    Failed,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Retrying => "retrying",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_review" => Some(Self::PendingReview),
            "retrying" => Some(Self::Retrying),
            "resolved" => Some(Self::Resolved),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable copy of the failure that caused the capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
}

impl From<&ServiceError> for ErrorDetail {
    fn from(error: &ServiceError) -> Self {
        Self { message: error.message.clone(), code: error.code.clone(), status: error.status }
    }
}

/// Serializable copy of the operation context, including the replay payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryContext {
    pub operation_key: String,
    pub instance_id: Option<String>,
    pub user_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl From<&OperationContext> for EntryContext {
    fn from(ctx: &OperationContext) -> Self {
        Self {
            operation_key: ctx.operation_key.clone(),
            instance_id: ctx.instance_id.clone(),
            user_id: ctx.user_id.clone(),
            occurred_at: ctx.occurred_at,
            payload: ctx.payload.clone(),
        }
    }
}

/// One durably recorded failure that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub error: ErrorDetail,
    pub context: EntryContext,
    /// Attempts actually made before capture.
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl DeadLetterEntry {
    pub fn new(error: &ServiceError, context: &OperationContext, retry_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            error: ErrorDetail::from(error),
            context: EntryContext::from(context),
            retry_count,
            created_at: Utc::now(),
            status: EntryStatus::PendingReview,
            resolved_at: None,
            failure_reason: None,
        }
    }

    pub(crate) fn apply(&mut self, patch: &EntryPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(resolved_at) = patch.resolved_at {
            self.resolved_at = Some(resolved_at);
        }
        if let Some(reason) = &patch.failure_reason {
            self.failure_reason = Some(reason.clone());
        }
    }
}

/// Query parameters for [`DeadLetterStore::list`](super::DeadLetterStore::list).
#[derive(Debug, Clone)]
pub struct EntryFilter {
    pub status: Option<EntryStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EntryFilter {
    fn default() -> Self {
        Self { status: None, limit: 50, offset: 0 }
    }
}

impl EntryFilter {
    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Partial update applied to an entry; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub status: Option<EntryStatus>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl EntryPatch {
    pub fn status(status: EntryStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn resolved(at: DateTime<Utc>) -> Self {
        Self { status: Some(EntryStatus::Resolved), resolved_at: Some(at), ..Self::default() }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(EntryStatus::Failed),
            failure_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    fn sample_entry() -> DeadLetterEntry {
        let error = ServiceError::new(ErrorKind::Unavailable, "upstream 503")
            .with_status(503)
            .with_code("unavailable");
        let ctx = OperationContext::new("mail.send")
            .with_user_id("user-1")
            .with_payload(json!({"to": "ops@example.com"}));
        DeadLetterEntry::new(&error, &ctx, 4)
    }

    #[test]
    fn new_entry_starts_pending_review() {
        let entry = sample_entry();
        assert_eq!(entry.status, EntryStatus::PendingReview);
        assert_eq!(entry.retry_count, 4);
        assert!(entry.resolved_at.is_none());
        assert!(entry.failure_reason.is_none());
        assert_eq!(entry.context.operation_key, "mail.send");
        assert_eq!(entry.error.status, Some(503));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            EntryStatus::PendingReview,
            EntryStatus::Retrying,
            EntryStatus::Resolved,
            EntryStatus::Failed,
        ] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::parse("unknown"), None);
    }

    #[test]
    fn patch_only_touches_supplied_fields() {
        let mut entry = sample_entry();
        entry.apply(&EntryPatch::status(EntryStatus::Retrying));
        assert_eq!(entry.status, EntryStatus::Retrying);
        assert!(entry.resolved_at.is_none());

        let at = Utc::now();
        entry.apply(&EntryPatch::resolved(at));
        assert_eq!(entry.status, EntryStatus::Resolved);
        assert_eq!(entry.resolved_at, Some(at));

        entry.apply(&EntryPatch::failed("handler rejected payload"));
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.failure_reason.as_deref(), Some("handler rejected payload"));
        // A failed patch does not erase the earlier resolution timestamp.
        assert_eq!(entry.resolved_at, Some(at));
    }

    #[test]
    fn entry_serializes_with_snake_case_status() {
        let entry = sample_entry();
        let value = serde_json::to_value(&entry).expect("entry serializes");
        assert_eq!(value["status"], "pending_review");
        assert_eq!(value["context"]["payload"]["to"], "ops@example.com");
    }
}
