//! Partial task updates and the client edit envelope.
//!
//! A [`TaskPatch`] carries only the fields an edit touches; everything
//! else is implicitly unchanged. A [`ClientEdit`] pairs a patch with the
//! version stamp the client last read, which is what lets the server
//! detect concurrent modification at apply time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::task::{
    ClientId, MAX_TITLE_LENGTH, TagId, Task, TaskId, TaskPriority, TaskStatus, Version,
};

/// The mutable task fields tracked by edits and conflict comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskField {
    /// Short title.
    Title,
    /// Free-form description.
    Description,
    /// Workflow state.
    Status,
    /// Urgency level.
    Priority,
    /// Optional calendar due date.
    DueDate,
    /// Attached tag references.
    Tags,
}

impl TaskField {
    /// All tracked fields, in the fixed display order.
    pub const ALL: [Self; 6] = [
        Self::Title,
        Self::Description,
        Self::Status,
        Self::Priority,
        Self::DueDate,
        Self::Tags,
    ];

    /// Human-readable label for comparison views.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::Description => "Description",
            Self::Status => "Status",
            Self::Priority => "Priority",
            Self::DueDate => "Due Date",
            Self::Tags => "Tags",
        }
    }
}

impl std::fmt::Display for TaskField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Title => write!(f, "title"),
            Self::Description => write!(f, "description"),
            Self::Status => write!(f, "status"),
            Self::Priority => write!(f, "priority"),
            Self::DueDate => write!(f, "dueDate"),
            Self::Tags => write!(f, "tags"),
        }
    }
}

/// A change to the nullable due date field.
///
/// Distinguishes "set to a concrete day" from "clear the date"; a patch
/// that does not touch the field carries neither. On the wire `Set`
/// serializes as the date and `Clear` as `null`, matching the REST
/// payloads where `"dueDate": null` means removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DueDateChange {
    /// Set the due date to a concrete day.
    Set(NaiveDate),
    /// Clear the due date.
    Clear,
}

impl DueDateChange {
    /// The date this change results in, if any.
    #[must_use]
    pub const fn as_option(self) -> Option<NaiveDate> {
        match self {
            Self::Set(date) => Some(date),
            Self::Clear => None,
        }
    }

    /// Builds the change that produces the given date state.
    #[must_use]
    pub const fn from_option(date: Option<NaiveDate>) -> Self {
        match date {
            Some(d) => Self::Set(d),
            None => Self::Clear,
        }
    }
}

/// Error returned when a patch fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Title was set to an empty (or all-whitespace) string.
    #[error("task title is empty")]
    EmptyTitle,
    /// Title exceeds the maximum allowed length.
    #[error("task title too long ({len} chars, max {max})")]
    TitleTooLong {
        /// Actual title length in characters.
        len: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// Checks a proposed title against the shared limits.
///
/// Used both by [`TaskPatch::validate`] and by create paths that carry a
/// title outside a patch.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyTitle`] for a blank title, or
/// [`ValidationError::TitleTooLong`] past [`MAX_TITLE_LENGTH`] characters.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    let len = title.chars().count();
    if len > MAX_TITLE_LENGTH {
        return Err(ValidationError::TitleTooLong {
            len,
            max: MAX_TITLE_LENGTH,
        });
    }
    Ok(())
}

/// A partial update to a task: only touched fields are present.
///
/// Tags are carried as [`TagId`] references, never as embedded
/// [`crate::task::Tag`] values; resolving ids to display names is a
/// read-side concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    /// New title, if touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description, if touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New workflow state, if touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// New urgency level, if touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    /// Due date change, if touched.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_due_date"
    )]
    pub due_date: Option<DueDateChange>,
    /// Replacement tag reference list, if touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagId>>,
}

/// Deserializes a present `dueDate` key. `null` must come back as
/// [`DueDateChange::Clear`], not as an untouched field; a plain `Option`
/// would collapse the two. An absent key never reaches this function and
/// falls back to the field default.
fn present_due_date<'de, D>(deserializer: D) -> Result<Option<DueDateChange>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<NaiveDate>::deserialize(deserializer)
        .map(|date| Some(DueDateChange::from_option(date)))
}

impl TaskPatch {
    /// Returns `true` if the patch touches the given field.
    #[must_use]
    pub const fn touches(&self, field: TaskField) -> bool {
        match field {
            TaskField::Title => self.title.is_some(),
            TaskField::Description => self.description.is_some(),
            TaskField::Status => self.status.is_some(),
            TaskField::Priority => self.priority.is_some(),
            TaskField::DueDate => self.due_date.is_some(),
            TaskField::Tags => self.tags.is_some(),
        }
    }

    /// The touched fields, in the fixed display order.
    #[must_use]
    pub fn touched(&self) -> Vec<TaskField> {
        TaskField::ALL
            .into_iter()
            .filter(|f| self.touches(*f))
            .collect()
    }

    /// Returns `true` if the patch touches no field at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.tags.is_none()
    }

    /// Folds `newer` over this patch: fields `newer` touches win, fields
    /// only this patch touches are kept.
    ///
    /// Used when a second edit to the same task arrives while an earlier
    /// one is still unresolved, so that neither intent is dropped.
    #[must_use]
    pub fn overlaid_with(&self, newer: &Self) -> Self {
        Self {
            title: newer.title.clone().or_else(|| self.title.clone()),
            description: newer
                .description
                .clone()
                .or_else(|| self.description.clone()),
            status: newer.status.or(self.status),
            priority: newer.priority.or(self.priority),
            due_date: newer.due_date.or(self.due_date),
            tags: newer.tags.clone().or_else(|| self.tags.clone()),
        }
    }

    /// Drops every field that would not actually change `snapshot`.
    ///
    /// This is the dirty-field rule used when a form is submitted: a value
    /// identical to the snapshot is not an edit. Tag lists compare
    /// order-insensitively by id.
    #[must_use]
    pub fn minimized_against(mut self, snapshot: &Task) -> Self {
        if self.title.as_deref() == Some(snapshot.title.as_str()) {
            self.title = None;
        }
        if self.description.as_deref() == Some(snapshot.description.as_str()) {
            self.description = None;
        }
        if self.status == Some(snapshot.status) {
            self.status = None;
        }
        if self.priority == Some(snapshot.priority) {
            self.priority = None;
        }
        if let Some(change) = self.due_date
            && change.as_option() == snapshot.due_date
        {
            self.due_date = None;
        }
        if let Some(ids) = &self.tags {
            let mut proposed = ids.clone();
            proposed.sort_unstable();
            let mut current = snapshot.tag_ids();
            current.sort_unstable();
            if proposed == current {
                self.tags = None;
            }
        }
        self
    }

    /// Validates the touched fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTitle`] if the title is set to a
    /// blank string, or [`ValidationError::TitleTooLong`] if it exceeds
    /// [`MAX_TITLE_LENGTH`] characters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        Ok(())
    }
}

/// A proposed partial update submitted against a known base version.
///
/// Created when the user submits a form or drag action; consumed once the
/// server responds. Valid only while `base_version` still matches the
/// server's current stamp for the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEdit {
    /// The task being edited.
    pub task_id: TaskId,
    /// The version stamp the client last read for this task.
    pub base_version: Version,
    /// The touched fields.
    pub changes: TaskPatch,
    /// The installation issuing the edit.
    pub client_id: ClientId,
}

impl ClientEdit {
    /// Builds an edit against a snapshot the client holds.
    ///
    /// The snapshot's version becomes the base version and the patch is
    /// minimized so that untouched-in-effect fields drop out.
    #[must_use]
    pub fn against(snapshot: &Task, changes: TaskPatch, client_id: ClientId) -> Self {
        Self {
            task_id: snapshot.id,
            base_version: snapshot.version,
            changes: changes.minimized_against(snapshot),
            client_id,
        }
    }

    /// The same changes re-targeted at a newer base version.
    ///
    /// Used when resubmitting after a conflict: the patch is already the
    /// resolved intent, only the base stamp moves forward.
    #[must_use]
    pub fn rebased(&self, base_version: Version) -> Self {
        Self {
            base_version,
            ..self.clone()
        }
    }
}
