//! Dead letter storage trait and the in-memory implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::entry::{DeadLetterEntry, EntryFilter, EntryPatch};
use crate::error::StoreError;

/// Durable storage for dead letter entries.
///
/// Implementations must never delete entries; the review lifecycle is
/// expressed purely through status updates.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), StoreError>;

    /// Applies `patch` to an existing entry. Fails with
    /// [`StoreError::NotFound`] when the id is unknown.
    async fn update(&self, id: Uuid, patch: EntryPatch) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError>;

    /// Entries matching `filter`, newest first.
    async fn list(&self, filter: &EntryFilter) -> Result<Vec<DeadLetterEntry>, StoreError>;
}

/// Non-durable store for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterStore {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), StoreError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: EntryPatch) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound { id })?;
        entry.apply(&patch);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError> {
        Ok(self.entries.read().iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self, filter: &EntryFilter) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let entries = self.entries.read();
        let mut matching: Vec<DeadLetterEntry> = entries
            .iter()
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().skip(filter.offset).take(filter.limit).collect())
    }
}
