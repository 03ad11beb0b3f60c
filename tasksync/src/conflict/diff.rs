//! Field-level comparison between a rejected edit and the server record.
//!
//! The comparison is pure and total: every tracked field yields exactly
//! one [`ComparisonRow`] in [`TaskField::ALL`] order, for any combination
//! of inputs. The local column shows what the user would end up with
//! (the edit's value for touched fields, the stale snapshot's value
//! otherwise); values that cannot be known degrade to a placeholder
//! instead of failing, so a comparison can always be rendered.

use chrono::NaiveDate;
use tasksync_proto::patch::{TaskField, TaskPatch};
use tasksync_proto::task::{Tag, TagId, Task};

/// Display form of an absent value.
pub const EMPTY_SENTINEL: &str = "—";
/// Display form of an empty tag list.
pub const EMPTY_LIST: &str = "None";

/// One row of the side-by-side comparison shown during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRow {
    /// The field this row describes.
    pub field: TaskField,
    /// Human-readable field label.
    pub label: &'static str,
    /// Canonical display of the local side.
    pub local: String,
    /// Canonical display of the server side.
    pub server: String,
    /// Whether the two sides show different values.
    pub differs: bool,
}

/// Computes the side-by-side comparison for a rejected edit.
///
/// `stale` is the pre-edit snapshot the client held; it may be absent
/// when the cache has since evicted the task.
#[must_use]
pub fn compare(changes: &TaskPatch, stale: Option<&Task>, server: &Task) -> Vec<ComparisonRow> {
    TaskField::ALL
        .into_iter()
        .map(|field| {
            let local = local_display(field, changes, stale, server);
            let server_text = field_display(field, server);
            let differs = local != server_text;
            ComparisonRow {
                field,
                label: field.label(),
                local,
                server: server_text,
                differs,
            }
        })
        .collect()
}

/// `true` if any row shows a real value difference, as opposed to a
/// version-only conflict.
#[must_use]
pub fn any_differs(rows: &[ComparisonRow]) -> bool {
    rows.iter().any(|r| r.differs)
}

/// Canonical display of one field of a snapshot.
#[must_use]
pub fn field_display(field: TaskField, task: &Task) -> String {
    match field {
        TaskField::Title => task.title.clone(),
        TaskField::Description => task.description.clone(),
        TaskField::Status => task.status.to_string(),
        TaskField::Priority => task.priority.to_string(),
        TaskField::DueDate => date_display(task.due_date),
        TaskField::Tags => names_display(&task.tag_names()),
    }
}

fn local_display(
    field: TaskField,
    changes: &TaskPatch,
    stale: Option<&Task>,
    server: &Task,
) -> String {
    match field {
        TaskField::Title => match &changes.title {
            Some(title) => title.clone(),
            None => stale.map_or_else(absent, |t| t.title.clone()),
        },
        TaskField::Description => match &changes.description {
            Some(description) => description.clone(),
            None => stale.map_or_else(absent, |t| t.description.clone()),
        },
        TaskField::Status => match changes.status {
            Some(status) => status.to_string(),
            None => stale.map_or_else(absent, |t| t.status.to_string()),
        },
        TaskField::Priority => match changes.priority {
            Some(priority) => priority.to_string(),
            None => stale.map_or_else(absent, |t| t.priority.to_string()),
        },
        TaskField::DueDate => match changes.due_date {
            Some(change) => date_display(change.as_option()),
            None => stale.map_or_else(absent, |t| date_display(t.due_date)),
        },
        TaskField::Tags => match &changes.tags {
            Some(ids) => ids_display(ids, stale, server),
            None => stale.map_or_else(absent, |t| names_display(&t.tag_names())),
        },
    }
}

fn absent() -> String {
    EMPTY_SENTINEL.to_owned()
}

fn date_display(date: Option<NaiveDate>) -> String {
    date.map_or_else(absent, |d| d.to_string())
}

fn names_display(names: &[String]) -> String {
    if names.is_empty() {
        EMPTY_LIST.to_owned()
    } else {
        names.join(", ")
    }
}

/// Renders an edit's tag references, resolving ids to display names
/// through the record's tag universe (the server snapshot first, then the
/// stale one). An id known to neither side degrades to its UUID form.
fn ids_display(ids: &[TagId], stale: Option<&Task>, server: &Task) -> String {
    if ids.is_empty() {
        return EMPTY_LIST.to_owned();
    }
    let names: Vec<String> = ids
        .iter()
        .map(|id| {
            known_tags(stale, server)
                .find(|t| t.id == *id)
                .map_or_else(|| id.to_string(), |t| t.name.clone())
        })
        .collect();
    names.join(", ")
}

/// Maps display names back to tag ids within the same record universe.
/// Matching is case-insensitive, mirroring the tag namespace rule; names
/// outside the universe are skipped.
#[must_use]
pub fn tag_ids_for_names(names: &[String], stale: Option<&Task>, server: &Task) -> Vec<TagId> {
    names
        .iter()
        .filter_map(|name| {
            known_tags(stale, server)
                .find(|t| t.name.eq_ignore_ascii_case(name))
                .map(|t| t.id)
        })
        .collect()
}

fn known_tags<'a>(stale: Option<&'a Task>, server: &'a Task) -> impl Iterator<Item = &'a Tag> {
    server
        .tags
        .iter()
        .chain(stale.into_iter().flat_map(|t| t.tags.iter()))
}

// --- tests ---
