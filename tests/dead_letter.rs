//! Dead letter review lifecycle against the durable SQLite store: capture,
//! list, manual replay, and replay after a simulated restart.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backstop::{
    DeadLetterEntry, EntryFilter, EntryStatus, ErrorKind, ExecuteError, OperationContext,
    ReplayHandler, ReplayOutcome, RetryExecutor, RetryPolicy, ServiceError, SqliteDeadLetterStore,
};
use serde_json::json;

/// Installs the test log subscriber once; `RUST_LOG` controls verbosity.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Replay handler that fails `fail_first` times, then succeeds.
struct CountingHandler {
    calls: AtomicU32,
    fail_first: u32,
}

impl CountingHandler {
    fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), fail_first })
    }
}

#[async_trait]
impl ReplayHandler for CountingHandler {
    async fn replay(&self, entry: &DeadLetterEntry) -> Result<(), ServiceError> {
        assert_eq!(entry.context.payload["to"], "ops@example.com", "payload travels to replay");
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ServiceError::new(ErrorKind::Unavailable, "provider still down"));
        }
        Ok(())
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_jitter(false)
}

fn mail_context() -> OperationContext {
    OperationContext::new("mail.send")
        .with_user_id("user-1")
        .with_payload(json!({"to": "ops@example.com", "template": "welcome"}))
}

async fn capture_failure(executor: &RetryExecutor) -> uuid::Uuid {
    let result: Result<(), _> = executor
        .execute(&mail_context(), &fast_policy(), || async {
            Err(ServiceError::http(503, "service unavailable"))
        })
        .await;
    match result {
        Err(ExecuteError::DeadLettered { entry_id, .. }) => entry_id,
        other => panic!("expected DeadLettered, got {other:?}"),
    }
}

/// Full review flow: a failure is captured as `pending_review`, a first
/// manual replay fails (entry becomes `failed`), a second replay succeeds
/// (entry becomes `resolved` with a timestamp). The entry is never deleted.
#[tokio::test(flavor = "multi_thread")]
async fn captured_failure_can_be_replayed_to_resolution() {
    init_tracing();
    let store = Arc::new(SqliteDeadLetterStore::open_in_memory().expect("db opens"));
    let executor = RetryExecutor::new(store);
    let handler = CountingHandler::new(1);
    executor.dead_letters().register_handler("mail.send", handler.clone());

    let entry_id = capture_failure(&executor).await;
    let dlq = executor.dead_letters();

    let entry = dlq.get(entry_id).await.expect("get succeeds").expect("entry exists");
    assert_eq!(entry.status, EntryStatus::PendingReview);
    assert_eq!(entry.retry_count, 4);

    let outcome = dlq.retry_entry(entry_id).await.expect("replay runs");
    assert!(matches!(outcome, ReplayOutcome::Failed { .. }));
    let entry = dlq.get(entry_id).await.expect("get succeeds").expect("entry exists");
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.failure_reason.as_deref(), Some("provider still down"));

    let outcome = dlq.retry_entry(entry_id).await.expect("replay runs");
    assert_eq!(outcome, ReplayOutcome::Resolved);
    let entry = dlq.get(entry_id).await.expect("get succeeds").expect("entry exists");
    assert_eq!(entry.status, EntryStatus::Resolved);
    assert!(entry.resolved_at.is_some());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

/// A capture that tripped the breaker does not block its own manual replay:
/// `retry_entry` clears the circuit for the operation key first.
#[tokio::test(flavor = "multi_thread")]
async fn manual_replay_is_not_blocked_by_a_stale_breaker() {
    init_tracing();
    let store = Arc::new(SqliteDeadLetterStore::open_in_memory().expect("db opens"));
    let executor = RetryExecutor::new(store);
    executor.dead_letters().register_handler("mail.send", CountingHandler::new(0));

    // Each exhausted execute records four failures; the second one pushes
    // the count past the threshold of five.
    let entry_id = capture_failure(&executor).await;
    let _ = capture_failure(&executor).await;
    assert!(executor.circuit_breakers().is_open("mail.send"));

    let outcome = executor.dead_letters().retry_entry(entry_id).await.expect("replay runs");
    assert_eq!(outcome, ReplayOutcome::Resolved);
    assert!(!executor.circuit_breakers().is_open("mail.send"));
}

/// Entries persisted in one process are listable and replayable from a
/// fresh executor over the same database file, with handlers re-registered
/// after the "restart".
#[tokio::test(flavor = "multi_thread")]
async fn entries_are_replayable_after_restart() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dead_letters.db");

    let entry_id = {
        let store = Arc::new(SqliteDeadLetterStore::open(&path).expect("db opens"));
        let executor = RetryExecutor::new(store);
        capture_failure(&executor).await
    };

    // New process: fresh executor, same file, handler registered anew.
    let store = Arc::new(SqliteDeadLetterStore::open(&path).expect("db reopens"));
    let executor = RetryExecutor::new(store);
    executor.dead_letters().register_handler("mail.send", CountingHandler::new(0));

    let pending = executor
        .dead_letters()
        .list(&EntryFilter::default().with_status(EntryStatus::PendingReview))
        .await
        .expect("list succeeds");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, entry_id);

    let outcome = executor.dead_letters().retry_entry(entry_id).await.expect("replay runs");
    assert_eq!(outcome, ReplayOutcome::Resolved);
}

/// Replaying an entry whose operation has no registered handler marks the
/// entry `failed` with a diagnostic reason instead of silently dropping it.
#[tokio::test(flavor = "multi_thread")]
async fn replay_without_handler_marks_entry_failed() {
    init_tracing();
    let store = Arc::new(SqliteDeadLetterStore::open_in_memory().expect("db opens"));
    let executor = RetryExecutor::new(store);

    let entry_id = capture_failure(&executor).await;
    let result = executor.dead_letters().retry_entry(entry_id).await;
    assert!(result.is_err());

    let entry = executor
        .dead_letters()
        .get(entry_id)
        .await
        .expect("get succeeds")
        .expect("entry exists");
    assert_eq!(entry.status, EntryStatus::Failed);
    assert!(entry
        .failure_reason
        .as_deref()
        .expect("reason recorded")
        .contains("no replay handler"));
}

/// Status filtering and pagination across a mixed set of entries.
#[tokio::test(flavor = "multi_thread")]
async fn listing_filters_by_status_and_paginates() {
    init_tracing();
    let store = Arc::new(SqliteDeadLetterStore::open_in_memory().expect("db opens"));
    let executor = RetryExecutor::new(store);
    executor.dead_letters().register_handler("mail.send", CountingHandler::new(0));

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(capture_failure(&executor).await);
        // Failures accumulate across captures and would trip the breaker;
        // keep it closed so every capture actually runs.
        executor.circuit_breakers().reset("mail.send");
    }
    executor.dead_letters().retry_entry(ids[0]).await.expect("replay runs");

    let dlq = executor.dead_letters();
    let pending = dlq
        .list(&EntryFilter::default().with_status(EntryStatus::PendingReview))
        .await
        .expect("list succeeds");
    assert_eq!(pending.len(), 3);

    let resolved = dlq
        .list(&EntryFilter::default().with_status(EntryStatus::Resolved))
        .await
        .expect("list succeeds");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, ids[0]);

    let page = dlq
        .list(&EntryFilter::default().with_limit(2))
        .await
        .expect("list succeeds");
    assert_eq!(page.len(), 2);
}
