//! HTTP surface of the task server.
//!
//! Exposes the task and tag tables over a small JSON REST API. Writes are
//! version-checked: a stale base version gets status 409 with a
//! [`ConflictBody`], optionally carrying the current server snapshot
//! inline (a deployment choice; clients must cope with either shape).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tasksync_proto::api::{
    ConflictBody, CreateTagBody, CreateTaskBody, DeleteTaskBody, ErrorBody, TagEnvelope,
    TagListEnvelope, TaskEnvelope, TaskListEnvelope, UpdateTaskBody,
};
use tasksync_proto::task::{Task, TaskId, Version};

use crate::store::{StoreError, TaskStore, WriteOutcome};

/// Shared server state behind the routes.
pub struct AppState {
    /// The version-authoritative tables.
    pub store: TaskStore,
    /// Whether 409 responses inline the current server snapshot.
    inline_snapshots: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Creates state with an empty store and inline snapshots enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: TaskStore::new(),
            inline_snapshots: true,
        }
    }

    /// Creates state with an explicit snapshot policy and a pre-built store.
    #[must_use]
    pub fn with_config(inline_snapshots: bool, store: TaskStore) -> Self {
        Self {
            store,
            inline_snapshots,
        }
    }
}

/// Builds the API router over the given state.
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/tasks",
            axum::routing::get(list_tasks).post(create_task),
        )
        .route(
            "/api/v1/tasks/{id}",
            axum::routing::get(get_task)
                .patch(update_task)
                .delete(delete_task),
        )
        .route(
            "/api/v1/tags",
            axum::routing::get(list_tags).post(create_tag),
        )
        .with_state(state)
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTaskBody>,
) -> Response {
    match state.store.create_task(&body).await {
        Ok(task) => {
            tracing::info!(task_id = %task.id, title = %task.title, "task created");
            (StatusCode::CREATED, Json(TaskEnvelope { task })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> Response {
    let tasks = state.store.list().await;
    Json(TaskListEnvelope { tasks }).into_response()
}

async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<TaskId>) -> Response {
    match state.store.get(id).await {
        Ok(task) => Json(TaskEnvelope { task }).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    Json(body): Json<UpdateTaskBody>,
) -> Response {
    match state.store.update(id, &body).await {
        Ok(WriteOutcome::Applied(task)) => {
            tracing::info!(
                task_id = %id,
                client_id = %body.client_id,
                version = %task.version,
                "edit applied"
            );
            (StatusCode::OK, Json(TaskEnvelope { task })).into_response()
        }
        Ok(WriteOutcome::StaleVersion { current, snapshot }) => {
            tracing::warn!(
                task_id = %id,
                client_id = %body.client_id,
                base = %body.version,
                current = %current,
                "version-rejected edit"
            );
            conflict_response(state.inline_snapshots, current, snapshot)
        }
        Err(e) => error_response(&e),
    }
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    Json(body): Json<DeleteTaskBody>,
) -> Response {
    match state.store.delete(id, &body).await {
        Ok(WriteOutcome::Applied(task)) => {
            tracing::info!(task_id = %id, client_id = %body.client_id, "task deleted");
            (StatusCode::OK, Json(TaskEnvelope { task })).into_response()
        }
        Ok(WriteOutcome::StaleVersion { current, snapshot }) => {
            tracing::warn!(
                task_id = %id,
                client_id = %body.client_id,
                base = %body.version,
                current = %current,
                "version-rejected delete"
            );
            conflict_response(state.inline_snapshots, current, snapshot)
        }
        Err(e) => error_response(&e),
    }
}

async fn create_tag(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTagBody>,
) -> Response {
    match state.store.create_tag(&body).await {
        Ok(tag) => {
            tracing::info!(tag_id = %tag.id, name = %tag.name, "tag created");
            (StatusCode::CREATED, Json(TagEnvelope { tag })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn list_tags(State(state): State<Arc<AppState>>) -> Response {
    let tags = state.store.list_tags().await;
    Json(TagListEnvelope { tags }).into_response()
}

/// 409 response for a version-rejected write.
fn conflict_response(inline: bool, current: Version, snapshot: Task) -> Response {
    let body = ConflictBody {
        message: "task was modified since it was last read".to_string(),
        current_version: current,
        task: inline.then_some(snapshot),
    };
    (StatusCode::CONFLICT, Json(body)).into_response()
}

/// Maps a store error to a status code and a plain error body.
fn error_response(e: &StoreError) -> Response {
    let status = match e {
        StoreError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidPatch(_)
        | StoreError::UnknownTag(_)
        | StoreError::DuplicateTag(_)
        | StoreError::EmptyTagName => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(ErrorBody {
            message: e.to_string(),
        }),
    )
        .into_response()
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(AppState::new())).await
}

/// Starts the server with a pre-configured [`AppState`].
///
/// Use [`AppState::with_config`] to control the 409 snapshot policy from
/// the resolved [`crate::config::ServerConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<AppState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "task server error");
        }
    });

    Ok((bound_addr, handle))
}
