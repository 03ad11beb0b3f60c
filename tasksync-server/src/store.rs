//! In-memory task and tag tables: the single version authority.
//!
//! Every accepted non-empty write bumps the task's version stamp; a write
//! carrying a stale base version is reported as [`WriteOutcome::StaleVersion`]
//! so the route layer can reject it with 409. Clients echo version stamps,
//! they never mint them.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use tasksync_proto::api::{CreateTagBody, CreateTaskBody, DeleteTaskBody, UpdateTaskBody};
use tasksync_proto::patch::{DueDateChange, TaskPatch, ValidationError, validate_title};
use tasksync_proto::task::{Tag, TagId, Task, TaskId, Version};

/// Errors a store operation can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The task does not exist (or is soft-deleted).
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// The write carried an invalid field value.
    #[error(transparent)]
    InvalidPatch(#[from] ValidationError),

    /// The write referenced a tag id the store does not know.
    #[error("unknown tag {0}")]
    UnknownTag(TagId),

    /// A tag with this name already exists (names are unique
    /// case-insensitively).
    #[error("tag name '{0}' already exists")]
    DuplicateTag(String),

    /// Tag creation with a blank name.
    #[error("tag name is empty")]
    EmptyTagName,
}

/// Outcome of a version-checked write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was accepted; the returned snapshot carries the new stamp.
    Applied(Task),
    /// The base version no longer matches what the store holds.
    StaleVersion {
        /// The stamp the store currently holds.
        current: Version,
        /// The current record, for conflict reporting.
        snapshot: Task,
    },
}

/// In-memory task store.
///
/// Thread-safe via [`RwLock`]. Lock order is tasks before tags whenever
/// both are held.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    tags: RwLock<HashMap<TagId, Tag>>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a task at version 1 from the request body.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPatch`] for a bad title and
    /// [`StoreError::UnknownTag`] for an unresolvable tag reference.
    pub async fn create_task(&self, body: &CreateTaskBody) -> Result<Task, StoreError> {
        validate_title(&body.title)?;

        let mut task = Task::new(&body.title);
        if let Some(description) = &body.description {
            task.description.clone_from(description);
        }
        if let Some(status) = body.status {
            task.status = status;
        }
        if let Some(priority) = body.priority {
            task.priority = priority;
        }
        task.due_date = body.due_date;
        if let Some(ids) = &body.tags {
            let tags = self.tags.read().await;
            task.tags = resolve_tags(ids, &tags)?;
        }

        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    /// Current snapshot of a live task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] for unknown or soft-deleted
    /// tasks.
    pub async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let tasks = self.tasks.read().await;
        match tasks.get(&id) {
            Some(task) if !task.is_deleted => Ok(task.clone()),
            _ => Err(StoreError::TaskNotFound(id)),
        }
    }

    /// All live tasks in creation order (v7 task ids sort by time).
    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut live: Vec<Task> = tasks.values().filter(|t| !t.is_deleted).cloned().collect();
        live.sort_by_key(|t| t.id);
        live
    }

    /// Applies a version-checked partial update.
    ///
    /// An empty patch with a matching version is accepted without bumping
    /// the stamp, so blind resubmissions of already-applied intents stay
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`], [`StoreError::InvalidPatch`],
    /// or [`StoreError::UnknownTag`].
    pub async fn update(&self, id: TaskId, body: &UpdateTaskBody) -> Result<WriteOutcome, StoreError> {
        body.changes.validate()?;

        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return Err(StoreError::TaskNotFound(id));
        };
        if task.is_deleted {
            return Err(StoreError::TaskNotFound(id));
        }
        if body.version != task.version {
            return Ok(WriteOutcome::StaleVersion {
                current: task.version,
                snapshot: task.clone(),
            });
        }
        if !body.changes.is_empty() {
            let tags = self.tags.read().await;
            apply_patch(task, &body.changes, &tags)?;
            task.version = task.version.next();
            task.updated_at = Utc::now();
        }
        Ok(WriteOutcome::Applied(task.clone()))
    }

    /// Soft-deletes a task, version-checked like any other write.
    ///
    /// The tombstone keeps its id and gets a bumped stamp; it disappears
    /// from reads.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] for unknown or already-deleted
    /// tasks.
    pub async fn delete(&self, id: TaskId, body: &DeleteTaskBody) -> Result<WriteOutcome, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return Err(StoreError::TaskNotFound(id));
        };
        if task.is_deleted {
            return Err(StoreError::TaskNotFound(id));
        }
        if body.version != task.version {
            return Ok(WriteOutcome::StaleVersion {
                current: task.version,
                snapshot: task.clone(),
            });
        }
        task.is_deleted = true;
        task.version = task.version.next();
        task.updated_at = Utc::now();
        Ok(WriteOutcome::Applied(task.clone()))
    }

    /// Creates a tag; names are unique ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyTagName`] or [`StoreError::DuplicateTag`].
    pub async fn create_tag(&self, body: &CreateTagBody) -> Result<Tag, StoreError> {
        let name = body.name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyTagName);
        }
        let mut tags = self.tags.write().await;
        if tags.values().any(|t| t.name.eq_ignore_ascii_case(name)) {
            return Err(StoreError::DuplicateTag(name.to_string()));
        }
        let tag = Tag {
            id: TagId::new(),
            name: name.to_string(),
            color: body.color.clone(),
        };
        tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    /// All tags, sorted by name.
    pub async fn list_tags(&self) -> Vec<Tag> {
        let tags = self.tags.read().await;
        let mut all: Vec<Tag> = tags.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Applies a patch to a task in place.
///
/// Tag references are resolved before any field is touched, so a bad
/// reference leaves the task unchanged.
fn apply_patch(
    task: &mut Task,
    patch: &TaskPatch,
    tags: &HashMap<TagId, Tag>,
) -> Result<(), StoreError> {
    let resolved = match &patch.tags {
        Some(ids) => Some(resolve_tags(ids, tags)?),
        None => None,
    };

    if let Some(title) = &patch.title {
        task.title.clone_from(title);
    }
    if let Some(description) = &patch.description {
        task.description.clone_from(description);
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(change) = patch.due_date {
        task.due_date = match change {
            DueDateChange::Set(date) => Some(date),
            DueDateChange::Clear => None,
        };
    }
    if let Some(resolved) = resolved {
        task.tags = resolved;
    }
    Ok(())
}

/// Resolves tag ids to full tags, in the order given.
fn resolve_tags(ids: &[TagId], tags: &HashMap<TagId, Tag>) -> Result<Vec<Tag>, StoreError> {
    let mut resolved = Vec::with_capacity(ids.len());
    for id in ids {
        let tag = tags.get(id).ok_or(StoreError::UnknownTag(*id))?;
        resolved.push(tag.clone());
    }
    Ok(resolved)
}
