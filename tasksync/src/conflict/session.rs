//! Lifecycle of a single conflict, from detection to close.
//!
//! A [`ConflictSession`] is the pure state machine; all I/O (snapshot
//! fetches, resubmissions) is driven by the manager. Because that I/O
//! happens outside the session lock, every result is re-validated against
//! the session's generation counter before it is applied: cancellation
//! and reopening bump the generation, which makes any still-in-flight
//! result for the previous round inert.

use std::collections::BTreeMap;

use tasksync_proto::patch::{ClientEdit, TaskField, TaskPatch};
use tasksync_proto::task::{Task, TaskId, Version};

use super::ConflictError;
use super::detect::{ConflictKind, ConflictRecord};
use super::diff::ComparisonRow;
use super::resolve::{self, Resolution, Side};

/// Where a conflict session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No conflict in flight. Sessions are never stored in this state; it
    /// is what the manager reports for a task without a session.
    Idle,
    /// Conflict known, authoritative snapshot being obtained.
    Detecting,
    /// Field-level conflict waiting for a resolution choice.
    AwaitingInput,
    /// Version-only conflict with its resubmission staged, waiting for
    /// acknowledgement (or auto-resubmitted, per configuration).
    Resolved,
    /// Resolution submitted, server response pending.
    Submitting,
    /// The resubmission conflicted again; detection restarts against the
    /// newer snapshot.
    Reopened,
    /// Session finished: applied, cancelled, or already consistent.
    Closed,
    /// The authoritative snapshot could not be obtained; the conflict
    /// stands but cannot progress.
    Failed,
}

impl SessionState {
    /// Short lowercase name used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::AwaitingInput => "awaiting-input",
            Self::Resolved => "resolved",
            Self::Submitting => "submitting",
            Self::Reopened => "reopened",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A resubmission handed to the manager, tied to the session generation
/// it was staged in.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub edit: ClientEdit,
    pub generation: u64,
}

/// What a resolution choice produced.
#[derive(Debug, Clone)]
pub(crate) enum Choice {
    /// A non-empty patch that must be submitted.
    Submit(Staged),
    /// The chosen state equals the server state field for field; the
    /// session closed without needing a round trip. Carries the server
    /// snapshot the record is now consistent at.
    AlreadyConsistent(Task),
}

/// State machine for one task's conflict.
#[derive(Debug)]
pub struct ConflictSession {
    task_id: TaskId,
    state: SessionState,
    generation: u64,
    /// The latest rejected local intent.
    edit: ClientEdit,
    /// The pre-edit snapshot the comparison is made against.
    stale: Option<Task>,
    /// The newest version the server has reported for the task.
    current_version: Version,
    record: Option<ConflictRecord>,
    /// Remembered merge selections, pruned to still-differing fields on
    /// every reopen.
    selections: BTreeMap<TaskField, Side>,
}

impl ConflictSession {
    /// Opens a session in `Detecting` for a freshly rejected edit.
    pub(crate) fn open(edit: ClientEdit, stale: Option<Task>, current_version: Version) -> Self {
        tracing::debug!(
            task_id = %edit.task_id,
            base = %edit.base_version,
            current = %current_version,
            "conflict session opened"
        );
        Self {
            task_id: edit.task_id,
            state: SessionState::Detecting,
            generation: 0,
            edit,
            stale,
            current_version,
            record: None,
            selections: BTreeMap::new(),
        }
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn record(&self) -> Option<&ConflictRecord> {
        self.record.as_ref()
    }

    /// The comparison rows, once detection has completed.
    pub(crate) fn rows_snapshot(&self) -> Option<Vec<ComparisonRow>> {
        self.record.as_ref().map(|r| r.rows.clone())
    }

    pub(crate) fn selections(&self) -> BTreeMap<TaskField, Side> {
        self.selections.clone()
    }

    fn set_state(&mut self, next: SessionState) {
        tracing::debug!(
            task_id = %self.task_id,
            from = self.state.name(),
            to = next.name(),
            "conflict session transition"
        );
        self.state = next;
    }

    /// Folds a second rejected edit for the same task into this session:
    /// the combined changes become the local intent and detection
    /// restarts against the newer rejection's version. Returns the new
    /// generation guarding the next snapshot fetch.
    pub(crate) fn coalesce(&mut self, edit: &ClientEdit, current_version: Version) -> u64 {
        self.edit.changes = self.edit.changes.overlaid_with(&edit.changes);
        self.edit.base_version = edit.base_version;
        self.current_version = current_version;
        self.record = None;
        self.generation += 1;
        self.set_state(SessionState::Reopened);
        self.set_state(SessionState::Detecting);
        self.generation
    }

    /// Installs the authoritative snapshot, provided this session is
    /// still in the generation that requested it. Returns the conflict
    /// classification, or `None` when the result is superseded and must
    /// be discarded.
    pub(crate) fn snapshot_ready(&mut self, generation: u64, server: Task) -> Option<ConflictKind> {
        if generation != self.generation || self.state != SessionState::Detecting {
            tracing::debug!(task_id = %self.task_id, "discarding superseded snapshot");
            return None;
        }
        self.current_version = server.version;
        let record = ConflictRecord::build(self.edit.clone(), self.stale.clone(), server);
        self.selections
            .retain(|field, _| record.rows.iter().any(|r| r.field == *field && r.differs));
        let kind = record.kind;
        self.record = Some(record);
        match kind {
            ConflictKind::FieldLevel => self.set_state(SessionState::AwaitingInput),
            ConflictKind::VersionOnly => self.set_state(SessionState::Resolved),
        }
        Some(kind)
    }

    /// Marks the snapshot fetch as failed, if it was still current.
    pub(crate) fn fetch_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != SessionState::Detecting {
            return false;
        }
        self.set_state(SessionState::Failed);
        true
    }

    /// Accepts a resolution choice for a field-level conflict and stages
    /// the resubmission.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::WrongState`] unless the session is
    /// awaiting input.
    pub(crate) fn choose(&mut self, resolution: &Resolution) -> Result<Choice, ConflictError> {
        if self.state != SessionState::AwaitingInput {
            return Err(self.wrong_state("resolve"));
        }
        let Some(record) = self.record.as_ref() else {
            return Err(self.wrong_state("resolve"));
        };
        let patch = resolve::resolution_patch(record, resolution);
        let base_version = record.server.version;
        let server = record.server.clone();
        if let Resolution::Merge(selections) = resolution {
            self.selections = selections.clone();
        }
        self.set_state(SessionState::Submitting);
        Ok(self.stage(patch, base_version, server))
    }

    /// Stages the resubmission for a version-only conflict: the original
    /// changes, rebased onto the current server version.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::WrongState`] unless the session is in
    /// `Resolved`.
    pub(crate) fn acknowledge(&mut self) -> Result<Choice, ConflictError> {
        if self.state != SessionState::Resolved {
            return Err(self.wrong_state("acknowledge"));
        }
        let Some(record) = self.record.as_ref() else {
            return Err(self.wrong_state("acknowledge"));
        };
        let patch = self.edit.changes.clone();
        let base_version = record.server.version;
        let server = record.server.clone();
        self.set_state(SessionState::Submitting);
        Ok(self.stage(patch, base_version, server))
    }

    /// Completes staging: an empty patch means the server state is the
    /// chosen state, so the session closes with no round trip.
    fn stage(&mut self, patch: TaskPatch, base_version: Version, server: Task) -> Choice {
        if patch.is_empty() {
            tracing::debug!(
                task_id = %self.task_id,
                version = %base_version,
                "resolution matches server state, closing without resubmission"
            );
            self.set_state(SessionState::Closed);
            return Choice::AlreadyConsistent(server);
        }
        let edit = ClientEdit {
            task_id: self.task_id,
            base_version,
            changes: patch,
            client_id: self.edit.client_id.clone(),
        };
        Choice::Submit(Staged {
            edit,
            generation: self.generation,
        })
    }

    /// Records a successful resubmission, if it was still current.
    pub(crate) fn submission_applied(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != SessionState::Submitting {
            return false;
        }
        self.set_state(SessionState::Closed);
        true
    }

    /// Records that the resubmission conflicted again. The submitted
    /// patch becomes the new local intent and the snapshot it was built
    /// against becomes the stale baseline; detection restarts. Returns
    /// the new generation, or `None` when the result was superseded.
    pub(crate) fn submission_conflicted(
        &mut self,
        generation: u64,
        submitted: ClientEdit,
        current_version: Version,
    ) -> Option<u64> {
        if generation != self.generation || self.state != SessionState::Submitting {
            return None;
        }
        self.stale = self.record.take().map(|r| r.server);
        self.edit = submitted;
        self.current_version = current_version;
        self.generation += 1;
        self.set_state(SessionState::Reopened);
        self.set_state(SessionState::Detecting);
        Some(self.generation)
    }

    /// Records a failed resubmission: the session returns to the state
    /// the choice was made from so it can be retried or adjusted.
    pub(crate) fn submission_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != SessionState::Submitting {
            return false;
        }
        let back = match self.record.as_ref().map(|r| r.kind) {
            Some(ConflictKind::VersionOnly) => SessionState::Resolved,
            _ => SessionState::AwaitingInput,
        };
        self.set_state(back);
        true
    }

    /// Abandons the conflict. Bumping the generation makes any in-flight
    /// fetch or resubmission result inert.
    pub(crate) fn cancel(&mut self) {
        self.generation += 1;
        self.set_state(SessionState::Closed);
    }

    fn wrong_state(&self, input: &'static str) -> ConflictError {
        ConflictError::WrongState {
            task_id: self.task_id,
            state: self.state.name(),
            input,
        }
    }
}

// --- tests ---
