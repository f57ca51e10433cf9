//! SQLite-backed dead letter store.
//!
//! Entries survive process restarts, which is what makes replay after a
//! crash possible. rusqlite is synchronous; every statement here is a short
//! single-row or indexed query, so calls run inline on the caller's task
//! under a connection mutex.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::entry::{DeadLetterEntry, EntryContext, EntryFilter, EntryPatch, EntryStatus, ErrorDetail};
use super::store::DeadLetterStore;
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dead_letters (
    id             TEXT PRIMARY KEY,
    operation_key  TEXT NOT NULL,
    instance_id    TEXT,
    user_id        TEXT,
    occurred_at    TEXT NOT NULL,
    payload        TEXT NOT NULL,
    error_message  TEXT NOT NULL,
    error_code     TEXT,
    http_status    INTEGER,
    retry_count    INTEGER NOT NULL,
    created_at     TEXT NOT NULL,
    status         TEXT NOT NULL,
    resolved_at    TEXT,
    failure_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_dead_letters_status_created
    ON dead_letters (status, created_at DESC);
";

const SELECT_COLUMNS: &str = "id, operation_key, instance_id, user_id, occurred_at, payload, \
     error_message, error_code, http_status, retry_count, created_at, status, \
     resolved_at, failure_reason";

/// Durable [`DeadLetterStore`] over a single SQLite database file.
pub struct SqliteDeadLetterStore {
    conn: Mutex<Connection>,
}

impl SqliteDeadLetterStore {
    /// Opens (creating if necessary) the database at `path` and ensures the
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.as_ref().display(), "dead letter store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<DeadLetterEntry> {
        let id: String = row.get(0)?;
        let occurred_at: String = row.get(4)?;
        let payload: String = row.get(5)?;
        let created_at: String = row.get(10)?;
        let status: String = row.get(11)?;
        let resolved_at: Option<String> = row.get(12)?;

        Ok(DeadLetterEntry {
            id: decode(0, Uuid::parse_str(&id))?,
            context: EntryContext {
                operation_key: row.get(1)?,
                instance_id: row.get(2)?,
                user_id: row.get(3)?,
                occurred_at: decode_timestamp(4, &occurred_at)?,
                payload: decode(5, serde_json::from_str(&payload))?,
            },
            error: ErrorDetail {
                message: row.get(6)?,
                code: row.get(7)?,
                status: row.get::<_, Option<i64>>(8)?.map(|s| s as u16),
            },
            retry_count: row.get::<_, i64>(9)? as u32,
            created_at: decode_timestamp(10, &created_at)?,
            status: EntryStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    11,
                    rusqlite::types::Type::Text,
                    format!("unknown dead letter status '{status}'").into(),
                )
            })?,
            resolved_at: match resolved_at {
                Some(raw) => Some(decode_timestamp(12, &raw)?),
                None => None,
            },
            failure_reason: row.get(13)?,
        })
    }
}

fn decode<T, E>(idx: usize, result: Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn decode_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    decode(idx, DateTime::parse_from_rfc3339(raw)).map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl DeadLetterStore for SqliteDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&entry.context.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dead_letters (
                id, operation_key, instance_id, user_id, occurred_at, payload,
                error_message, error_code, http_status, retry_count, created_at,
                status, resolved_at, failure_reason
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                entry.id.to_string(),
                entry.context.operation_key,
                entry.context.instance_id,
                entry.context.user_id,
                entry.context.occurred_at.to_rfc3339(),
                payload,
                entry.error.message,
                entry.error.code,
                entry.error.status.map(i64::from),
                i64::from(entry.retry_count),
                entry.created_at.to_rfc3339(),
                entry.status.as_str(),
                entry.resolved_at.map(|at| at.to_rfc3339()),
                entry.failure_reason,
            ],
        )?;
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: EntryPatch) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE dead_letters SET
                status = COALESCE(?1, status),
                resolved_at = COALESCE(?2, resolved_at),
                failure_reason = COALESCE(?3, failure_reason)
             WHERE id = ?4",
            params![
                patch.status.map(EntryStatus::as_str),
                patch.resolved_at.map(|at| at.to_rfc3339()),
                patch.failure_reason,
                id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StoreError> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM dead_letters WHERE id = ?1"),
                params![id.to_string()],
                Self::entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    async fn list(&self, filter: &EntryFilter) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM dead_letters
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![
                filter.status.map(EntryStatus::as_str),
                filter.limit as i64,
                filter.offset as i64,
            ],
            Self::entry_from_row,
        )?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for SqliteDeadLetterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDeadLetterStore").finish_non_exhaustive()
    }
}
