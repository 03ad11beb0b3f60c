//! Classification of server responses to a submitted edit.

use tasksync_proto::patch::ClientEdit;
use tasksync_proto::task::{Task, TaskId, Version};

use super::diff::{self, ComparisonRow};
use crate::api::SubmitOutcome;

/// How a conflict presents once the authoritative snapshot is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// At least one field really differs between the sides.
    FieldLevel,
    /// Only the version moved; the states agree on every field. Needs no
    /// per-field input, just a resubmission against the current version.
    VersionOnly,
}

impl ConflictKind {
    /// Classifies a computed comparison.
    #[must_use]
    pub fn from_rows(rows: &[ComparisonRow]) -> Self {
        if diff::any_differs(rows) {
            Self::FieldLevel
        } else {
            Self::VersionOnly
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FieldLevel => write!(f, "field-level"),
            Self::VersionOnly => write!(f, "version-only"),
        }
    }
}

/// Everything needed to resolve one detected conflict.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    /// The task in conflict.
    pub task_id: TaskId,
    /// The rejected local intent.
    pub edit: ClientEdit,
    /// The pre-edit snapshot the client held, when the cache still had
    /// one.
    pub stale: Option<Task>,
    /// The authoritative snapshot the conflict is resolved against.
    pub server: Task,
    /// Classification of the divergence.
    pub kind: ConflictKind,
    /// Side-by-side comparison, one row per tracked field.
    pub rows: Vec<ComparisonRow>,
}

impl ConflictRecord {
    /// Builds the record once the authoritative snapshot is known,
    /// computing the comparison and classifying it.
    #[must_use]
    pub fn build(edit: ClientEdit, stale: Option<Task>, server: Task) -> Self {
        let rows = diff::compare(&edit.changes, stale.as_ref(), &server);
        let kind = ConflictKind::from_rows(&rows);
        if let Some(stale_task) = &stale
            && server.version <= stale_task.version
        {
            // a genuine conflict always carries a newer server version
            tracing::warn!(
                task_id = %edit.task_id,
                server = %server.version,
                stale = %stale_task.version,
                "conflict snapshot does not advance past the stale version"
            );
        }
        Self {
            task_id: edit.task_id,
            edit,
            stale,
            server,
            kind,
            rows,
        }
    }

    /// The rows that actually differ.
    pub fn differing_rows(&self) -> impl Iterator<Item = &ComparisonRow> {
        self.rows.iter().filter(|r| r.differs)
    }
}

/// A submit outcome after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// The server accepted the edit; the record is consistent again.
    Applied(Task),
    /// Version mismatch. Resolution needs the authoritative snapshot,
    /// which the rejection may or may not have inlined.
    Conflicted {
        /// The version the server currently holds.
        current_version: Version,
        /// The server snapshot, when the rejection inlined it.
        inline: Option<Task>,
    },
}

/// Classifies a raw submit outcome. Conflicts log at `info` since they
/// are an expected outcome worth seeing; plain applies log at `debug`.
#[must_use]
pub fn classify(task_id: TaskId, outcome: SubmitOutcome) -> Detection {
    match outcome {
        SubmitOutcome::Applied(task) => {
            tracing::debug!(task_id = %task_id, version = %task.version, "edit applied");
            Detection::Applied(task)
        }
        SubmitOutcome::Conflicted {
            current_version,
            server,
        } => {
            tracing::info!(
                task_id = %task_id,
                current_version = %current_version,
                inline_snapshot = server.is_some(),
                "edit rejected by version check"
            );
            Detection::Conflicted {
                current_version,
                inline: server,
            }
        }
    }
}

// --- tests ---
