//! Integration tests for conflicts that race with further server movement.
//!
//! A resolution targets the snapshot its comparison was built against; if
//! the record moves again before the resubmission lands, the session
//! reopens and detection restarts with the newer snapshot. These tests
//! pin the rebasing rules: what becomes the stale baseline, which merge
//! selections survive, and how a second local edit folds in.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::redundant_clone)]

use std::collections::BTreeMap;
use std::sync::Arc;

use tasksync::api::InMemoryApi;
use tasksync::cache::InMemoryCache;
use tasksync::conflict::{
    ConflictEvent, ConflictKind, ConflictManager, EditOutcome, ManagerConfig, Resolution,
    SessionState, Side,
};
use tasksync_proto::patch::{TaskField, TaskPatch};
use tasksync_proto::task::{ClientId, Task, TaskPriority, TaskStatus};
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

/// Opens a title conflict: we renamed against version 1, a competitor
/// renamed first. Leaves the session awaiting input at server version 2.
async fn open_title_conflict(
    manager: &TestManager,
    api: &InMemoryApi,
    cache: &InMemoryCache,
) -> Task {
    let task = seed_task(api, cache, "Draft launch checklist");
    api.apply_external(task.id, &title_patch("Draft the launch checklist"))
        .expect("competitor edit applies");
    let edit = manager.edit_against(&task, title_patch("Launch checklist, draft 2"));
    let outcome = manager.submit(edit).await.expect("submit runs");
    assert!(matches!(outcome, EditOutcome::ConflictPending { .. }));
    task
}

// ===========================================================================
// Reopened sessions
// ===========================================================================

// --- the rebased baseline ---

#[tokio::test]
async fn server_movement_during_input_reopens_against_the_newer_snapshot() {
    let (manager, _events, api, cache) = make_stack();
    let task = open_title_conflict(&manager, &api, &cache).await;

    // while the user stares at the table, the competitor edits on: v3
    api.apply_external(
        task.id,
        &TaskPatch {
            description: Some("dry-run on staging first".to_string()),
            ..Default::default()
        },
    )
    .expect("competitor edit applies");

    // our resolution targets v2 and is rejected; the session reopens
    let outcome = manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("resolution runs");
    let EditOutcome::ConflictPending { kind, rows } = outcome else {
        panic!("expected the session to reopen");
    };
    assert_eq!(kind, ConflictKind::FieldLevel);
    assert_eq!(manager.state(task.id).await, SessionState::AwaitingInput);

    let row = |field: TaskField| rows.iter().find(|r| r.field == field).unwrap();

    // the title is still contested
    assert_eq!(row(TaskField::Title).local, "Launch checklist, draft 2");
    assert_eq!(row(TaskField::Title).server, "Draft the launch checklist");
    assert!(row(TaskField::Title).differs);

    // the v2 snapshot the resolution targeted is the new stale baseline,
    // so its (empty) description shows as our local value
    assert_eq!(row(TaskField::Description).local, "");
    assert_eq!(row(TaskField::Description).server, "dry-run on staging first");
    assert!(row(TaskField::Description).differs);

    // resolving against the fresh table now lands
    let outcome = manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("resolution runs");
    let EditOutcome::Applied(updated) = outcome else {
        panic!("expected the second resolution to apply");
    };
    assert_eq!(updated.title, "Launch checklist, draft 2");
    assert_eq!(updated.description, "dry-run on staging first");
    assert_eq!(updated.version.get(), 4);
}

#[tokio::test]
async fn each_detection_round_is_announced() {
    let (manager, mut events, api, cache) = make_stack();
    let task = open_title_conflict(&manager, &api, &cache).await;

    api.apply_external(task.id, &title_patch("Launch checklist v3"))
        .expect("competitor edit applies");
    manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("resolution runs");
    manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("resolution runs");

    let seen = drain(&mut events);
    let detections = seen
        .iter()
        .filter(|e| matches!(e, ConflictEvent::ConflictDetected { .. }))
        .count();
    let closes = seen
        .iter()
        .filter(|e| matches!(e, ConflictEvent::SessionClosed { .. }))
        .count();
    assert_eq!(detections, 2);
    assert_eq!(closes, 1);
}

// --- merge selections across rounds ---

#[tokio::test]
async fn merge_selections_survive_only_for_still_contested_fields() {
    let (manager, _events, api, cache) = make_stack();
    let task = seed_task(&api, &cache, "Plan rollout");

    // competitor moves the status; we rename
    api.apply_external(
        task.id,
        &TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        },
    )
    .expect("competitor edit applies");
    let edit = manager.edit_against(&task, title_patch("Plan the rollout"));
    manager.submit(edit).await.expect("submit runs");

    // the competitor reverts the status before our resolution lands
    api.apply_external(
        task.id,
        &TaskPatch {
            status: Some(TaskStatus::Todo),
            ..Default::default()
        },
    )
    .expect("competitor edit applies");

    // we picked our side for both contested fields
    let picks = BTreeMap::from([
        (TaskField::Title, Side::Local),
        (TaskField::Status, Side::Local),
    ]);
    let outcome = manager
        .resolve(task.id, &Resolution::Merge(picks))
        .await
        .expect("resolution runs");
    assert!(matches!(outcome, EditOutcome::ConflictPending { .. }));

    // in the new round the status agrees again, so only the title pick
    // is worth remembering
    let kept = manager.selections(task.id).await;
    assert_eq!(kept.get(&TaskField::Title), Some(&Side::Local));
    assert_eq!(kept.get(&TaskField::Status), None);

    let outcome = manager
        .resolve(task.id, &Resolution::Merge(kept))
        .await
        .expect("resolution runs");
    let EditOutcome::Applied(updated) = outcome else {
        panic!("expected the merge to apply");
    };
    assert_eq!(updated.title, "Plan the rollout");
    assert_eq!(updated.status, TaskStatus::Todo);
}

// --- coalescing a second local edit ---

#[tokio::test]
async fn a_second_edit_folds_into_the_open_session() {
    let (manager, _events, api, cache) = make_stack();
    let task = open_title_conflict(&manager, &api, &cache).await;

    // the user keeps editing the same task from another view
    let second = manager.edit_against(
        &task,
        TaskPatch {
            priority: Some(TaskPriority::Urgent),
            ..Default::default()
        },
    );
    let outcome = manager.submit(second).await.expect("submit runs");
    assert!(matches!(outcome, EditOutcome::ConflictPending { .. }));
    assert_eq!(manager.open_sessions().await, vec![task.id]);

    let outcome = manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("resolution runs");
    let EditOutcome::Applied(updated) = outcome else {
        panic!("expected the resolution to apply");
    };
    // both intents land together
    assert_eq!(updated.title, "Launch checklist, draft 2");
    assert_eq!(updated.priority, TaskPriority::Urgent);
}

#[tokio::test]
async fn overlapping_coalesced_edits_keep_the_newer_value() {
    let (manager, _events, api, cache) = make_stack();
    let task = seed_task(&api, &cache, "Write onboarding doc");
    api.apply_external(task.id, &title_patch("Write the onboarding doc"))
        .expect("competitor edit applies");

    let first = manager.edit_against(&task, title_patch("Onboarding doc, pass 1"));
    manager.submit(first).await.expect("submit runs");

    // the second intent supersedes the first for the same field
    let second = manager.edit_against(&task, title_patch("Onboarding doc, pass 2"));
    let outcome = manager.submit(second).await.expect("submit runs");
    let EditOutcome::ConflictPending { rows, .. } = outcome else {
        panic!("expected a pending conflict");
    };
    let title = rows
        .iter()
        .find(|r| r.field == TaskField::Title)
        .expect("title row");
    assert_eq!(title.local, "Onboarding doc, pass 2");

    let outcome = manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("resolution runs");
    assert!(matches!(
        outcome,
        EditOutcome::Applied(t) if t.title == "Onboarding doc, pass 2"
    ));
}

// --- a reopened conflict that turned degenerate ---

#[tokio::test]
async fn reopened_round_that_no_longer_differs_converges_automatically() {
    let (manager, mut events, api, cache) = make_stack();
    let task = seed_task(&api, &cache, "File expense report");

    api.apply_external(
        task.id,
        &TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        },
    )
    .expect("competitor edit applies");
    let edit = manager.edit_against(&task, title_patch("File travel expenses"));
    manager.submit(edit).await.expect("submit runs");

    // before our resolution lands the competitor adopts our exact title
    api.apply_external(task.id, &title_patch("File travel expenses"))
        .expect("competitor edit applies");

    // round 2 is version-only and auto-resolves; the verbatim
    // resubmission still counts as a write
    let outcome = manager
        .resolve(task.id, &Resolution::UseLocal)
        .await
        .expect("resolution runs");
    let EditOutcome::Applied(updated) = outcome else {
        panic!("expected the reopened round to converge");
    };
    assert_eq!(updated.title, "File travel expenses");
    assert_eq!(updated.status, TaskStatus::InProgress);
    assert_eq!(updated.version.get(), 4);

    // only the first round asked for input
    let detections = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, ConflictEvent::ConflictDetected { .. }))
        .count();
    assert_eq!(detections, 1);
    assert_eq!(manager.state(task.id).await, SessionState::Idle);
}
