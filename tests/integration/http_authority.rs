//! End-to-end tests against a live HTTP server.
//!
//! Everything the in-memory fixture fakes is exercised here for real: the
//! wire format, the 409 rejection with and without the inline snapshot,
//! version-checked deletion, and a full conflict round trip driven by the
//! manager over the HTTP adapter.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::redundant_clone)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tasksync::api::{ApiError, HttpApi, SubmitOutcome, TaskApi};
use tasksync::cache::InMemoryCache;
use tasksync::conflict::{
    ConflictManager, EditOutcome, ManagerConfig, Resolution, SessionState, Side,
};
use tasksync_proto::api::{CreateTagBody, CreateTaskBody, DeleteTaskBody};
use tasksync_proto::patch::{ClientEdit, TaskField, TaskPatch};
use tasksync_proto::task::{ClientId, TaskPriority, TaskStatus};
use tasksync_server::routes::{start_server, start_server_with_state, AppState};
use tasksync_server::store::TaskStore;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Starts a server with default policy (inline snapshots on) and returns
/// an adapter pointed at it.
async fn start_default_server() -> HttpApi {
    let (addr, _handle) = start_server("127.0.0.1:0")
        .await
        .expect("server starts on an ephemeral port");
    HttpApi::new(format!("http://{addr}"))
}

/// Starts a server that answers 409 without the inline snapshot.
async fn start_terse_server() -> HttpApi {
    let state = Arc::new(AppState::with_config(false, TaskStore::new()));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("server starts on an ephemeral port");
    HttpApi::new(format!("http://{addr}"))
}

/// A minimal creation body with the given title.
fn create_body(title: &str) -> CreateTaskBody {
    CreateTaskBody {
        title: title.to_string(),
        description: None,
        status: None,
        priority: None,
        due_date: None,
        tags: None,
        client_id: Some(ClientId::new("laptop-install")),
    }
}

fn title_patch(title: &str) -> TaskPatch {
    TaskPatch {
        title: Some(title.to_string()),
        ..Default::default()
    }
}

// ===========================================================================
// HTTP round trips
// ===========================================================================

// --- creation and retrieval ---

#[tokio::test]
async fn create_edit_fetch_round_trip() {
    let api = start_default_server().await;

    let release = api
        .create_tag(&CreateTagBody {
            name: "release".to_string(),
            color: "#aa3322".to_string(),
        })
        .await
        .expect("tag creation succeeds");

    let created = api
        .create_task(&CreateTaskBody {
            title: "Stage the release".to_string(),
            description: Some("cut the branch first".to_string()),
            status: None,
            priority: Some(TaskPriority::High),
            due_date: NaiveDate::from_ymd_opt(2026, 9, 30),
            tags: Some(vec![release.id]),
            client_id: Some(ClientId::new("laptop-install")),
        })
        .await
        .expect("task creation succeeds");
    assert_eq!(created.version.get(), 1);
    assert_eq!(created.status, TaskStatus::Todo);
    assert_eq!(created.priority, TaskPriority::High);
    assert_eq!(created.tag_names(), vec!["release"]);

    let edit = ClientEdit::against(
        &created,
        TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        },
        ClientId::new("laptop-install"),
    );
    let outcome = api.submit_edit(&edit).await.expect("edit submits");
    let SubmitOutcome::Applied(updated) = outcome else {
        panic!("expected the edit to apply");
    };
    assert_eq!(updated.version.get(), 2);
    assert_eq!(updated.status, TaskStatus::InProgress);

    let fetched = api.fetch_task(created.id).await.expect("fetch succeeds");
    assert_eq!(fetched, updated);
}

// --- the 409 surface ---

#[tokio::test]
async fn stale_edit_gets_the_current_version_and_snapshot() {
    let api = start_default_server().await;
    let competitor = api.clone();

    let created = api
        .create_task(&create_body("Renew TLS certificates"))
        .await
        .expect("task creation succeeds");

    let theirs = ClientEdit::against(
        &created,
        title_patch("Renew and pin TLS certificates"),
        ClientId::new("desktop-install"),
    );
    competitor
        .submit_edit(&theirs)
        .await
        .expect("competitor edit submits");

    // our edit still carries version 1
    let ours = ClientEdit::against(
        &created,
        title_patch("Renew certs"),
        ClientId::new("laptop-install"),
    );
    let outcome = api.submit_edit(&ours).await.expect("submit runs");
    let SubmitOutcome::Conflicted {
        current_version,
        server,
    } = outcome
    else {
        panic!("expected a version rejection");
    };
    assert_eq!(current_version.get(), 2);
    let snapshot = server.expect("default policy inlines the snapshot");
    assert_eq!(snapshot.title, "Renew and pin TLS certificates");
    assert_eq!(snapshot.version.get(), 2);
}

// --- manager over the wire ---

#[tokio::test]
async fn conflict_resolves_end_to_end_over_http() {
    let api = start_default_server().await;
    let competitor = api.clone();
    let cache = Arc::new(InMemoryCache::new());

    let created = api
        .create_task(&create_body("Tune alert thresholds"))
        .await
        .expect("task creation succeeds");
    cache.insert(created.clone());

    let theirs = ClientEdit::against(
        &created,
        TaskPatch {
            title: Some("Tune paging thresholds".to_string()),
            priority: Some(TaskPriority::Urgent),
            ..Default::default()
        },
        ClientId::new("desktop-install"),
    );
    competitor
        .submit_edit(&theirs)
        .await
        .expect("competitor edit submits");

    let (manager, _events) = ConflictManager::new(
        api,
        Arc::clone(&cache),
        ClientId::new("laptop-install"),
        ManagerConfig::default(),
    );

    let edit = manager.edit_against(&created, title_patch("Tune alert noise thresholds"));
    let outcome = manager.submit(edit).await.expect("submit runs");
    let EditOutcome::ConflictPending { rows, .. } = outcome else {
        panic!("expected a pending conflict");
    };
    let title = rows
        .iter()
        .find(|r| r.field == TaskField::Title)
        .expect("title row");
    assert_eq!(title.local, "Tune alert noise thresholds");
    assert_eq!(title.server, "Tune paging thresholds");
    assert!(title.differs);

    // keep our title, the competitor's priority
    let picks = BTreeMap::from([(TaskField::Title, Side::Local)]);
    let outcome = manager
        .resolve(created.id, &Resolution::Merge(picks))
        .await
        .expect("resolution runs");
    let EditOutcome::Applied(updated) = outcome else {
        panic!("expected the merge to apply");
    };
    assert_eq!(updated.title, "Tune alert noise thresholds");
    assert_eq!(updated.priority, TaskPriority::Urgent);
    assert_eq!(updated.version.get(), 3);
    assert_eq!(manager.state(created.id).await, SessionState::Idle);
    assert_eq!(cache.invalidations(), vec![created.id]);
}

#[tokio::test]
async fn terse_conflict_responses_force_a_separate_fetch() {
    let api = start_terse_server().await;
    let competitor = api.clone();
    let cache = Arc::new(InMemoryCache::new());

    let created = api
        .create_task(&create_body("Rotate API keys"))
        .await
        .expect("task creation succeeds");
    cache.insert(created.clone());

    let theirs = ClientEdit::against(
        &created,
        title_patch("Rotate all API keys"),
        ClientId::new("desktop-install"),
    );
    let outcome = competitor
        .submit_edit(&theirs)
        .await
        .expect("competitor edit submits");
    assert!(matches!(outcome, SubmitOutcome::Applied(_)));

    let (manager, _events) = ConflictManager::new(
        api,
        Arc::clone(&cache),
        ClientId::new("laptop-install"),
        ManagerConfig::default(),
    );
    let edit = manager.edit_against(&created, title_patch("Rotate stale API keys"));
    let outcome = manager.submit(edit).await.expect("submit runs");

    // detection still produced the full table, via GET
    let EditOutcome::ConflictPending { rows, .. } = outcome else {
        panic!("expected a pending conflict");
    };
    let title = rows
        .iter()
        .find(|r| r.field == TaskField::Title)
        .expect("title row");
    assert_eq!(title.server, "Rotate all API keys");
    assert!(title.differs);
}

// --- deletion ---

#[tokio::test]
async fn deletes_are_version_checked_like_edits() {
    let api = start_default_server().await;
    let competitor = api.clone();

    let created = api
        .create_task(&create_body("Retire the old wiki"))
        .await
        .expect("task creation succeeds");

    let theirs = ClientEdit::against(
        &created,
        title_patch("Archive the old wiki"),
        ClientId::new("desktop-install"),
    );
    competitor
        .submit_edit(&theirs)
        .await
        .expect("competitor edit submits");

    // deleting with the stale stamp is rejected like any other write
    let stale = DeleteTaskBody {
        version: created.version,
        client_id: ClientId::new("laptop-install"),
    };
    let outcome = api
        .delete_task(created.id, &stale)
        .await
        .expect("delete request runs");
    let SubmitOutcome::Conflicted {
        current_version, ..
    } = outcome
    else {
        panic!("expected the stale delete to be rejected");
    };
    assert_eq!(current_version.get(), 2);

    // retried with the current stamp it goes through
    let fresh = DeleteTaskBody {
        version: current_version,
        client_id: ClientId::new("laptop-install"),
    };
    let outcome = api
        .delete_task(created.id, &fresh)
        .await
        .expect("delete request runs");
    let SubmitOutcome::Applied(tombstone) = outcome else {
        panic!("expected the delete to apply");
    };
    assert!(tombstone.is_deleted);

    // the record is gone from reads
    assert!(matches!(
        api.fetch_task(created.id).await,
        Err(ApiError::NotFound(_))
    ));
    let listed = api.list_tasks().await.expect("listing succeeds");
    assert!(listed.iter().all(|t| t.id != created.id));
}

// --- listings ---

#[tokio::test]
async fn listings_reflect_live_tasks_and_tags() {
    let api = start_default_server().await;

    api.create_tag(&CreateTagBody {
        name: "ops".to_string(),
        color: "#224466".to_string(),
    })
    .await
    .expect("tag creation succeeds");
    api.create_task(&create_body("Check disk alerts"))
        .await
        .expect("task creation succeeds");
    api.create_task(&create_body("Upgrade the bastion"))
        .await
        .expect("task creation succeeds");

    let tasks = api.list_tasks().await.expect("listing succeeds");
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.version.get() == 1));

    let tags = api.list_tags().await.expect("tag listing succeeds");
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "ops");
}
