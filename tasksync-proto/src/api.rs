//! REST body types shared by the client adapter and the reference server.
//!
//! All bodies serialize as camelCase JSON, the wire convention of the
//! task API. The conflict body is what a version-rejected `PATCH` returns
//! with status 409; whether it inlines the current server snapshot is a
//! server-side choice, so `task` stays optional and clients must be
//! prepared to fetch the snapshot separately.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::patch::TaskPatch;
use crate::task::{ClientId, Tag, TagId, Task, TaskPriority, TaskStatus, Version};

/// Body of `POST /api/v1/tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    /// Title of the new task.
    pub title: String,
    /// Optional description; defaults to empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Initial workflow state; defaults to `todo`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Initial urgency level; defaults to `medium`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    /// Optional due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Tags to attach, by id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagId>>,
    /// Installation creating the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

/// Body of `PATCH /api/v1/tasks/{id}`: the touched fields flattened
/// alongside the base version and the issuing client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskBody {
    /// The touched fields.
    #[serde(flatten)]
    pub changes: TaskPatch,
    /// The version stamp the client last read.
    pub version: Version,
    /// The installation issuing the edit.
    pub client_id: ClientId,
}

/// Body of `DELETE /api/v1/tasks/{id}` (soft delete, version-checked).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskBody {
    /// The version stamp the client last read.
    pub version: Version,
    /// The installation issuing the delete.
    pub client_id: ClientId,
}

/// Successful single-task response: `{ "task": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// The task snapshot.
    pub task: Task,
}

/// Task listing response: `{ "tasks": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListEnvelope {
    /// All live task snapshots.
    pub tasks: Vec<Task>,
}

/// Status 409 response to a version-rejected write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictBody {
    /// Human-readable rejection summary.
    pub message: String,
    /// The version the server currently holds for the record.
    pub current_version: Version,
    /// The current server snapshot, when the server inlines it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

/// Generic error response body for 4xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error summary.
    pub message: String,
}

/// Body of `POST /api/v1/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTagBody {
    /// Tag display name, unique case-insensitively.
    pub name: String,
    /// Display color (hex string).
    pub color: String,
}

/// Successful single-tag response: `{ "tag": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEnvelope {
    /// The created or fetched tag.
    pub tag: Tag,
}

/// Tag listing response: `{ "tags": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagListEnvelope {
    /// All tags in the namespace.
    pub tags: Vec<Tag>,
}
