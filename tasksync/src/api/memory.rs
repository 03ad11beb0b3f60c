//! In-process version authority used by tests and offline development.
//!
//! [`InMemoryApi`] mirrors the server's concurrency contract: every
//! accepted non-empty edit bumps the task version, and an edit whose
//! base version does not match the stored version is rejected as
//! conflicted. Tests drive divergence with [`InMemoryApi::apply_external`]
//! and [`InMemoryApi::bump_version`], which stand in for a competing
//! client whose edit the server accepted first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tasksync_proto::patch::{ClientEdit, DueDateChange, TaskPatch};
use tasksync_proto::task::{Tag, TagId, Task, TaskId};

use super::{ApiError, SubmitOutcome, TaskApi};

/// Test double for the task server.
#[derive(Debug, Default)]
pub struct InMemoryApi {
    tasks: Mutex<HashMap<TaskId, Task>>,
    tags: Mutex<HashMap<TagId, Tag>>,
    /// When false, conflict rejections omit the server snapshot and the
    /// caller must fetch it separately.
    omit_inline_snapshots: AtomicBool,
    fail_submits: AtomicBool,
    fail_fetches: AtomicBool,
    submit_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemoryApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a task snapshot, stored verbatim including its version.
    pub fn insert_task(&self, task: Task) {
        self.tasks.lock().insert(task.id, task);
    }

    /// Registers a tag so edits may reference it by id.
    pub fn insert_tag(&self, tag: Tag) {
        self.tags.lock().insert(tag.id, tag);
    }

    /// Current stored snapshot, if any.
    #[must_use]
    pub fn snapshot(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().get(&id).cloned()
    }

    /// Applies a patch as if a competing client's edit had been accepted:
    /// fields change and the version bumps, no questions asked.
    pub fn apply_external(&self, id: TaskId, patch: &TaskPatch) -> Option<Task> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&id)?;
        let tags = self.tags.lock();
        if apply_patch(task, patch, &tags).is_err() {
            return None;
        }
        task.version = task.version.next();
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    /// Advances the stored version without changing any field. Produces
    /// the degenerate conflict shape: version moved, content identical.
    pub fn bump_version(&self, id: TaskId) -> Option<Task> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&id)?;
        task.version = task.version.next();
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    /// When set, conflict rejections no longer carry the server snapshot.
    pub fn set_omit_inline_snapshots(&self, omit: bool) {
        self.omit_inline_snapshots.store(omit, Ordering::SeqCst);
    }

    pub fn set_fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl TaskApi for InMemoryApi {
    async fn submit_edit(&self, edit: &ClientEdit) -> Result<SubmitOutcome, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("injected submit failure".into()));
        }
        edit.changes
            .validate()
            .map_err(|e| ApiError::Validation(e.to_string()))?;

        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(&edit.task_id) else {
            return Err(ApiError::NotFound(edit.task_id));
        };
        if edit.base_version != task.version {
            let server = (!self.omit_inline_snapshots.load(Ordering::SeqCst))
                .then(|| task.clone());
            return Ok(SubmitOutcome::Conflicted {
                current_version: task.version,
                server,
            });
        }
        if !edit.changes.is_empty() {
            let tags = self.tags.lock();
            apply_patch(task, &edit.changes, &tags)?;
            task.version = task.version.next();
            task.updated_at = Utc::now();
        }
        Ok(SubmitOutcome::Applied(task.clone()))
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("injected fetch failure".into()));
        }
        self.tasks
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ApiError::NotFound(id))
    }
}

fn apply_patch(
    task: &mut Task,
    patch: &TaskPatch,
    tags: &HashMap<TagId, Tag>,
) -> Result<(), ApiError> {
    // Resolve tag references before touching the task, so a bad reference
    // leaves it unchanged.
    let resolved = match &patch.tags {
        Some(ids) => {
            let mut resolved = Vec::with_capacity(ids.len());
            for id in ids {
                let tag = tags
                    .get(id)
                    .ok_or_else(|| ApiError::Validation(format!("unknown tag {id}")))?;
                resolved.push(tag.clone());
            }
            Some(resolved)
        }
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

// --- tests ---
