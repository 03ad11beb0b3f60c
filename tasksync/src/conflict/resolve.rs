//! Resolution strategies and the patches that realize them.

use std::collections::BTreeMap;

use tasksync_proto::patch::{DueDateChange, TaskField, TaskPatch};

use super::detect::ConflictRecord;

/// Which side's value a merge keeps for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Keep the local value.
    Local,
    /// Keep the server value.
    Server,
}

/// A chosen way out of a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Keep every local change, rebased onto the current server version.
    UseLocal,
    /// Discard the local changes and accept the server state as is.
    UseRemote,
    /// Per-field choice. Fields not mentioned default to the server side.
    Merge(BTreeMap<TaskField, Side>),
}

/// Builds the patch that realizes a resolution against a record.
///
/// The patch targets the record's current server version. In a merge,
/// picking the server side is a no-op against the server's own state, so
/// only local-side picks contribute fields; only differing rows are
/// considered at all. The result may therefore be empty (`UseRemote`, or
/// a merge picking the server everywhere), which callers complete without
/// a network round trip.
#[must_use]
pub fn resolution_patch(record: &ConflictRecord, resolution: &Resolution) -> TaskPatch {
    match resolution {
        Resolution::UseLocal => record.edit.changes.clone(),
        Resolution::UseRemote => TaskPatch::default(),
        Resolution::Merge(selections) => merge_patch(record, selections),
    }
}

fn merge_patch(record: &ConflictRecord, selections: &BTreeMap<TaskField, Side>) -> TaskPatch {
    let mut patch = TaskPatch::default();
    for row in record.differing_rows() {
        let side = selections.get(&row.field).copied().unwrap_or(Side::Server);
        if side == Side::Local {
            set_local_value(&mut patch, row.field, record);
        }
    }
    patch
}

/// Writes the record's local value for `field` into the patch: the edit's
/// value when touched, the stale snapshot's otherwise. When neither can
/// supply one (field untouched and the cache had evicted the snapshot)
/// the field is left out and the server value stands.
fn set_local_value(patch: &mut TaskPatch, field: TaskField, record: &ConflictRecord) {
    let changes = &record.edit.changes;
    let stale = record.stale.as_ref();
    match field {
        TaskField::Title => {
            patch.title = changes
                .title
                .clone()
                .or_else(|| stale.map(|t| t.title.clone()));
        }
        TaskField::Description => {
            patch.description = changes
                .description
                .clone()
                .or_else(|| stale.map(|t| t.description.clone()));
        }
        TaskField::Status => {
            patch.status = changes.status.or_else(|| stale.map(|t| t.status));
        }
        TaskField::Priority => {
            patch.priority = changes.priority.or_else(|| stale.map(|t| t.priority));
        }
        TaskField::DueDate => {
            patch.due_date = changes
                .due_date
                .or_else(|| stale.map(|t| DueDateChange::from_option(t.due_date)));
        }
        TaskField::Tags => {
            patch.tags = changes.tags.clone().or_else(|| stale.map(|t| t.tag_ids()));
        }
    }
}

// --- tests ---
