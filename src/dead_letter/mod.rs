//! Durable dead letter queue.
//!
//! Failures that exhaust their retries are persisted here with enough
//! context to replay them later, surfaced to operators through a
//! [`DeadLetterNotifier`], and moved through a review lifecycle
//! (`pending_review`, `retrying`, `resolved`, `failed`) without ever being
//! deleted.

mod entry;
mod notify;
mod service;
mod sqlite;
mod store;

pub use entry::{DeadLetterEntry, EntryContext, EntryFilter, EntryPatch, EntryStatus, ErrorDetail};
pub use notify::{DeadLetterNotifier, LogNotifier};
pub use service::{DeadLetterService, ReplayError, ReplayHandler, ReplayOutcome};
pub use sqlite::SqliteDeadLetterStore;
pub use store::{DeadLetterStore, MemoryDeadLetterStore};
