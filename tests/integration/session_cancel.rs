//! Integration tests for abandoning conflicts and for transport failures.
//!
//! Cancelling must leave the server exactly as the competitor left it,
//! free the task for fresh edits, and tell the UI the session is gone.
//! Transport failures must not corrupt the session: a failed
//! resubmission returns to input, a failed snapshot fetch closes the
//! session as failed, and both leave the task workable afterwards.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::redundant_clone)]

use std::sync::Arc;

use tasksync::api::{ApiError, InMemoryApi};
use tasksync::cache::InMemoryCache;
use tasksync::conflict::{
    ConflictError, ConflictEvent, ConflictManager, EditOutcome, ManagerConfig, Resolution,
    SessionOutcome, SessionState,
};
use tasksync_proto::patch::TaskPatch;
use tasksync_proto::task::{ClientId, Task, TaskId, TaskStatus, MAX_TITLE_LENGTH};
use tokio::sync::mpsc;

type TestManager = ConflictManager<Arc<InMemoryApi>, Arc<InMemoryCache>>;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Creates a manager over fresh in-memory fixtures, with version-only
/// auto-resolution on.
fn make_stack() -> (
    TestManager,
    mpsc::Receiver<ConflictEvent>,
    Arc<InMemoryApi>,
    Arc<InMemoryCache>,
) {
    let api = Arc::new(InMemoryApi::new());
    let cache = Arc::new(InMemoryCache::new());
    let (manager, events) = ConflictManager::new(
        Arc::clone(&api),
        Arc::clone(&cache),
        ClientId::new("laptop-install"),
        ManagerConfig::default(),
    );
    (manager, events, api, cache)
}

/// Seeds a task at version 1 into the server fixture and the cache.
fn seed_task(api: &InMemoryApi, cache: &InMemoryCache, title: &str) -> Task {
    let task = Task::new(title);
    api.insert_task(task.clone());
    cache.insert(task.clone());
    task
}

fn drain(events: &mut mpsc::Receiver<ConflictEvent>) -> Vec<ConflictEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn title_patch(title: &str) -> TaskPatch {
    TaskPatch {
        title: Some(title.to_string()),
        ..Default::default()
    }
}

/// Opens a title conflict and leaves the session awaiting input.
async fn open_conflict(manager: &TestManager, api: &InMemoryApi, cache: &InMemoryCache) -> Task {
    let task = seed_task(api, cache, "Prepare demo environment");
    api.apply_external(task.id, &title_patch("Prepare the demo environment"))
        .expect("competitor edit applies");
    let edit = manager.edit_against(&task, title_patch("Prepare demo env"));
    let outcome = manager.submit(edit).await.expect("submit runs");
    assert!(matches!(outcome, EditOutcome::ConflictPending { .. }));
    task
}

// ===========================================================================
// Cancellation
// ===========================================================================

#[tokio::test]
async fn cancel_discards_the_intent_and_keeps_the_server_state() {
    let (manager, mut events, api, cache) = make_stack();
    let task = open_conflict(&manager, &api, &cache).await;
    let writes_before = api.submit_calls();

    manager.cancel(task.id).await.expect("cancel runs");

    // nothing of ours reached the server
    assert_eq!(api.submit_calls(), writes_before);
    let server = api.snapshot(task.id).expect("task exists");
    assert_eq!(server.title, "Prepare the demo environment");
    assert_eq!(server.version.get(), 2);

    // the session is gone and the cached snapshot was flagged stale
    assert_eq!(manager.state(task.id).await, SessionState::Idle);
    assert!(manager.open_sessions().await.is_empty());
    assert_eq!(cache.invalidations(), vec![task.id]);
    assert!(matches!(
        drain(&mut events).last(),
        Some(ConflictEvent::SessionClosed {
            outcome: SessionOutcome::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn a_fresh_edit_after_cancel_applies_cleanly() {
    let (manager, _events, api, cache) = make_stack();
    let task = open_conflict(&manager, &api, &cache).await;

    manager.cancel(task.id).await.expect("cancel runs");

    // the user refetches and edits against the current snapshot
    let current = api.snapshot(task.id).expect("task exists");
    cache.insert(current.clone());
    let edit = manager.edit_against(&current, title_patch("Prepare demo env"));
    let outcome = manager.submit(edit).await.expect("submit runs");
    let EditOutcome::Applied(updated) = outcome else {
        panic!("expected a clean apply");
    };
    assert_eq!(updated.title, "Prepare demo env");
    assert_eq!(updated.version.get(), 3);
    assert_eq!(manager.state(task.id).await, SessionState::Idle);
}

#[tokio::test]
async fn closed_sessions_reject_further_input() {
    let (manager, _events, api, cache) = make_stack();
    let task = open_conflict(&manager, &api, &cache).await;
    manager.cancel(task.id).await.expect("cancel runs");

    assert_eq!(
        manager
            .resolve(task.id, &Resolution::UseLocal)
            .await
            .expect_err("resolve must fail"),
        ConflictError::NoSession(task.id)
    );
    assert_eq!(
        manager
            .acknowledge(task.id)
            .await
            .expect_err("acknowledge must fail"),
        ConflictError::NoSession(task.id)
    );
    assert_eq!(
        manager.cancel(task.id).await.expect_err("cancel must fail"),
        ConflictError::NoSession(task.id)
    );
    assert_eq!(manager.rows(task.id).await, None);
    assert!(manager.selections(task.id).await.is_empty());
}

// ===========================================================================
// Failures
// ===========================================================================

// --- resubmission failures ---

#[tokio::test]
async fn failed_resubmission_returns_the_session_to_input() {
    let (manager, _events, api, cache) = make_stack();
    let task = open_conflict(&manager, &api, &cache).await;

    api.set_fail_submits(true);
    let err = manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect_err("resolution must fail");
    assert!(matches!(err, ConflictError::Api(ApiError::Transport(_))));

    // the conflict is still there, table intact, ready for a retry
    assert_eq!(manager.state(task.id).await, SessionState::AwaitingInput);
    assert!(manager.rows(task.id).await.is_some());

    api.set_fail_submits(false);
    let outcome = manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("retry runs");
    assert!(matches!(
        outcome,
        EditOutcome::Applied(t) if t.title == "Prepare demo env"
    ));
}

// --- snapshot fetch failures ---

#[tokio::test]
async fn fetch_failure_closes_the_session_as_failed() {
    let (manager, mut events, api, cache) = make_stack();
    let task = seed_task(&api, &cache, "Prepare demo environment");
    api.apply_external(task.id, &title_patch("Prepare the demo environment"))
        .expect("competitor edit applies");
    api.set_omit_inline_snapshots(true);
    api.set_fail_fetches(true);

    let edit = manager.edit_against(&task, title_patch("Prepare demo env"));
    let err = manager.submit(edit).await.expect_err("submit must fail");
    assert!(matches!(err, ConflictError::SnapshotFetch(_)));

    // the session did not linger in a half-open state
    assert_eq!(manager.state(task.id).await, SessionState::Idle);
    assert_eq!(cache.invalidations(), vec![task.id]);
    assert!(matches!(
        drain(&mut events).last(),
        Some(ConflictEvent::SessionClosed {
            outcome: SessionOutcome::Failed { .. },
            ..
        })
    ));

    // once the transport recovers, resubmitting opens a normal session
    api.set_fail_fetches(false);
    let edit = manager.edit_against(&task, title_patch("Prepare demo env"));
    let outcome = manager.submit(edit).await.expect("submit runs");
    assert!(matches!(outcome, EditOutcome::ConflictPending { .. }));
    assert_eq!(manager.state(task.id).await, SessionState::AwaitingInput);
}

// --- rejections that are not conflicts ---

#[tokio::test]
async fn validation_rejections_do_not_open_a_session() {
    let (manager, mut events, api, cache) = make_stack();
    let task = seed_task(&api, &cache, "Prepare demo environment");

    let edit = manager.edit_against(&task, title_patch(&"x".repeat(MAX_TITLE_LENGTH + 1)));
    let err = manager.submit(edit).await.expect_err("submit must fail");
    assert!(matches!(err, ConflictError::Api(ApiError::Validation(_))));

    assert_eq!(manager.state(task.id).await, SessionState::Idle);
    assert!(drain(&mut events).is_empty());
    assert!(cache.invalidations().is_empty());
}

#[tokio::test]
async fn edits_to_unknown_tasks_are_not_conflicts() {
    let (manager, mut events, api, cache) = make_stack();
    let ghost = seed_task(&api, &cache, "Prepare demo environment");
    let mut edit = manager.edit_against(&ghost, title_patch("renamed"));
    edit.task_id = TaskId::new();

    let err = manager.submit(edit).await.expect_err("submit must fail");
    assert!(matches!(err, ConflictError::Api(ApiError::NotFound(_))));
    assert!(manager.open_sessions().await.is_empty());
    assert!(drain(&mut events).is_empty());
}

// --- cancelling with work in flight ---

#[tokio::test]
async fn cancel_beats_a_parked_version_only_session() {
    let api = Arc::new(InMemoryApi::new());
    let cache = Arc::new(InMemoryCache::new());
    let config = ManagerConfig {
        auto_resolve_version_only: false,
        ..ManagerConfig::default()
    };
    let (manager, _events) = ConflictManager::new(
        Arc::clone(&api),
        Arc::clone(&cache),
        ClientId::new("laptop-install"),
        config,
    );

    let task = seed_task(&api, &cache, "Prepare demo environment");
    let change = TaskPatch {
        status: Some(TaskStatus::Done),
        ..Default::default()
    };
    api.apply_external(task.id, &change)
        .expect("competitor edit applies");

    let edit = manager.edit_against(&task, change);
    manager.submit(edit).await.expect("submit runs");
    assert_eq!(manager.state(task.id).await, SessionState::Resolved);

    // abandoning a parked acknowledgement is allowed
    manager.cancel(task.id).await.expect("cancel runs");
    assert_eq!(manager.state(task.id).await, SessionState::Idle);
    assert_eq!(
        manager.acknowledge(task.id).await.expect_err("must fail"),
        ConflictError::NoSession(task.id)
    );
}
