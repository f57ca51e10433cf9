//! Dead letter capture and replay orchestration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::entry::{DeadLetterEntry, EntryFilter, EntryPatch, EntryStatus};
use super::notify::DeadLetterNotifier;
use super::store::DeadLetterStore;
use crate::breaker::CircuitBreakerRegistry;
use crate::clock::{Clock, SystemClock};
use crate::context::OperationContext;
use crate::error::{ServiceError, StoreError};

/// Re-executes a captured operation from its persisted entry.
///
/// Handlers are registered per operation key and looked up at replay time,
/// so entries recorded before a restart can still be replayed as long as the
/// new process registers a handler for the same key. The entry's
/// `context.payload` must carry everything the handler needs.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn replay(&self, entry: &DeadLetterEntry) -> Result<(), ServiceError>;
}

/// Failure of the replay machinery itself, as opposed to a failed replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("dead letter entry not found: {id}")]
    NotFound { id: Uuid },

    #[error("no replay handler registered for operation '{key}'")]
    NoHandler { key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a completed replay attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Resolved,
    Failed { reason: String },
}

/// Facade over the store, notifier, and replay registry.
pub struct DeadLetterService<C: Clock = SystemClock> {
    store: Arc<dyn DeadLetterStore>,
    notifier: Arc<dyn DeadLetterNotifier>,
    handlers: DashMap<String, Arc<dyn ReplayHandler>>,
    breakers: Arc<CircuitBreakerRegistry<C>>,
}

impl<C: Clock> DeadLetterService<C> {
    pub fn new(
        store: Arc<dyn DeadLetterStore>,
        notifier: Arc<dyn DeadLetterNotifier>,
        breakers: Arc<CircuitBreakerRegistry<C>>,
    ) -> Self {
        Self { store, notifier, handlers: DashMap::new(), breakers }
    }

    /// Registers (or replaces) the replay handler for `operation_key`.
    pub fn register_handler(
        &self,
        operation_key: impl Into<String>,
        handler: Arc<dyn ReplayHandler>,
    ) {
        self.handlers.insert(operation_key.into(), handler);
    }

    /// Persists a new entry and notifies, returning the entry id.
    ///
    /// Persistence comes first. If it fails the full entry is logged so the
    /// failure is not lost entirely, and the store error is surfaced to the
    /// caller; no notification is sent for an unpersisted entry. A notifier
    /// failure after a successful insert is logged and swallowed.
    #[instrument(skip_all, fields(operation_key = %ctx.operation_key, retry_count = retry_count))]
    pub async fn enqueue(
        &self,
        service_error: &ServiceError,
        ctx: &OperationContext,
        retry_count: u32,
    ) -> Result<Uuid, StoreError> {
        let entry = DeadLetterEntry::new(service_error, ctx, retry_count);
        if let Err(store_error) = self.store.insert(&entry).await {
            let dump = match serde_json::to_string(&entry) {
                Ok(json) => json,
                Err(_) => format!("{entry:?}"),
            };
            error!(
                entry_id = %entry.id,
                error = %store_error,
                entry = %dump,
                "failed to persist dead letter entry, logged copy is the only record"
            );
            return Err(store_error);
        }

        if let Err(notify_error) = self.notifier.notify(&entry).await {
            warn!(entry_id = %entry.id, error = %notify_error, "dead letter notification failed");
        }
        info!(entry_id = %entry.id, "failure captured for review");
        Ok(entry.id)
    }

    /// Entries matching `filter`, newest first.
    pub async fn list(&self, filter: &EntryFilter) -> Result<Vec<DeadLetterEntry>, StoreError> {
        self.store.list(filter).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError> {
        self.store.get(id).await
    }

    /// Replays the captured operation behind entry `id`.
    ///
    /// Clears the circuit for the entry's operation key first, so a manual
    /// retry is not rejected by a breaker that tripped when the failure was
    /// originally captured. The entry moves to `retrying` for the duration
    /// and ends `resolved` or `failed`; a missing handler marks it `failed`
    /// and returns [`ReplayError::NoHandler`].
    #[instrument(skip(self), fields(entry_id = %id))]
    pub async fn retry_entry(&self, id: Uuid) -> Result<ReplayOutcome, ReplayError> {
        let entry = self.store.get(id).await?.ok_or(ReplayError::NotFound { id })?;
        let key = entry.context.operation_key.clone();

        self.breakers.reset(&key);
        self.store.update(id, EntryPatch::status(EntryStatus::Retrying)).await?;

        let handler = match self.handlers.get(&key) {
            Some(handler) => Arc::clone(handler.value()),
            None => {
                let reason = format!("no replay handler registered for operation '{key}'");
                self.store.update(id, EntryPatch::failed(reason)).await?;
                return Err(ReplayError::NoHandler { key });
            }
        };

        match handler.replay(&entry).await {
            Ok(()) => {
                self.store.update(id, EntryPatch::resolved(Utc::now())).await?;
                info!(operation_key = %key, "dead letter entry resolved by replay");
                Ok(ReplayOutcome::Resolved)
            }
            Err(replay_error) => {
                let reason = replay_error.to_string();
                self.store.update(id, EntryPatch::failed(reason.clone())).await?;
                warn!(operation_key = %key, error = %reason, "dead letter replay failed");
                Ok(ReplayOutcome::Failed { reason })
            }
        }
    }
}

impl<C: Clock> std::fmt::Debug for DeadLetterService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterService")
            .field("registered_handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
