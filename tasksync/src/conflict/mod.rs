//! Optimistic-concurrency conflict detection and resolution.
//!
//! Edits are submitted against the version stamp the client last read;
//! when the server rejects one by version check, a per-task
//! [`session::ConflictSession`] opens, obtains the authoritative
//! snapshot, and computes a field-by-field comparison. Field-level
//! conflicts wait for a [`Resolution`] choice; version-only conflicts
//! (content identical, version moved) can be resubmitted without input.
//! Either way the server stays the sole version authority: resolution
//! produces a fresh edit against the server's current version, never a
//! locally minted one.
//!
//! [`manager::ConflictManager`] is the entry point; the submodules split
//! the machinery:
//! - [`detect`] — classification of server responses
//! - [`diff`] — pure field comparison
//! - [`resolve`] — resolution strategies and patch construction
//! - [`session`] — the per-task state machine
//! - [`manager`] — orchestration, one session per task

pub mod detect;
pub mod diff;
pub mod manager;
pub mod resolve;
pub mod session;

pub use detect::{ConflictKind, ConflictRecord, Detection};
pub use diff::{ComparisonRow, EMPTY_LIST, EMPTY_SENTINEL};
pub use manager::{
    ConflictEvent, ConflictManager, DEFAULT_EVENT_BUFFER, EditOutcome, ManagerConfig,
    SessionOutcome,
};
pub use resolve::{Resolution, Side};
pub use session::SessionState;

use tasksync_proto::task::TaskId;

use crate::api::ApiError;

/// Errors surfaced by conflict orchestration.
///
/// A detected conflict is never an error; these cover the ways the
/// machinery itself can fail or be handed input it cannot accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    /// The API rejected a call for a reason other than a version check.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The authoritative snapshot for a conflict could not be loaded.
    #[error("could not load server snapshot: {0}")]
    SnapshotFetch(#[source] ApiError),

    /// No conflict session is open for the task.
    #[error("no conflict session open for task {0}")]
    NoSession(TaskId),

    /// The session exists but is not in a state that accepts this input.
    #[error("conflict session for task {task_id} is {state}, cannot {input}")]
    WrongState {
        /// The task whose session rejected the input.
        task_id: TaskId,
        /// The state the session was in.
        state: &'static str,
        /// The input that was rejected.
        input: &'static str,
    },

    /// The session was cancelled or reopened while this call was in
    /// flight, so its result was discarded.
    #[error("conflict session for task {0} was superseded")]
    Superseded(TaskId),
}
