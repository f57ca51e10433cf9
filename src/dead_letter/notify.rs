//! Dead letter notification dispatch.

use async_trait::async_trait;
use tracing::warn;

use super::entry::DeadLetterEntry;
use crate::error::NotifyError;

/// Receives a notification whenever a failure is captured.
///
/// Implementations reach operators however the host application prefers
/// (desktop notification, chat webhook, email). Notification is best-effort:
/// the entry is already persisted by the time this runs, and a failure here
/// is logged but never propagated to the original caller.
#[async_trait]
pub trait DeadLetterNotifier: Send + Sync {
    async fn notify(&self, entry: &DeadLetterEntry) -> Result<(), NotifyError>;
}

/// Default notifier that emits a structured warning log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl DeadLetterNotifier for LogNotifier {
    async fn notify(&self, entry: &DeadLetterEntry) -> Result<(), NotifyError> {
        warn!(
            entry_id = %entry.id,
            operation_key = %entry.context.operation_key,
            retry_count = entry.retry_count,
            error = %entry.error.message,
            "operation dead lettered, pending manual review"
        );
        Ok(())
    }
}
