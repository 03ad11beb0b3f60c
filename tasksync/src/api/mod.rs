//! API boundary to the task server of record.
//!
//! Defines the [`TaskApi`] trait that all server adapters must satisfy.
//! Concrete implementations include:
//! - [`memory::InMemoryApi`] — in-process version authority for testing
//! - [`http::HttpApi`] — REST adapter for a real task server
//!
//! A version conflict is deliberately NOT an [`ApiError`]: it is a
//! first-class [`SubmitOutcome`] variant, because rejection by version
//! check is the expected trigger for conflict resolution rather than a
//! failure to propagate.

pub mod http;
pub mod memory;

pub use http::HttpApi;
pub use memory::InMemoryApi;

use tasksync_proto::patch::ClientEdit;
use tasksync_proto::task::{Task, TaskId, Version};

/// Errors from the API boundary other than version conflicts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The task does not exist (or is gone) on the server.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The server rejected the payload as invalid.
    #[error("edit rejected: {0}")]
    Validation(String),

    /// The server refused the operation for this client.
    #[error("permission denied: {0}")]
    Forbidden(String),

    /// The request could not complete (connectivity, timeout, 5xx).
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a body this client cannot interpret.
    #[error("malformed server response: {0}")]
    Decode(String),
}

/// Result of submitting a [`ClientEdit`] to the server of record.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The edit applied. Carries the updated snapshot with its new
    /// server-assigned version stamp.
    Applied(Task),
    /// The edit's base version no longer matches the record.
    Conflicted {
        /// The version the server currently holds.
        current_version: Version,
        /// The current server snapshot, when the server inlines it in
        /// the rejection. Absent snapshots must be fetched separately.
        server: Option<Task>,
    },
}

/// Async boundary to the server of record.
///
/// Implementations never interpret version stamps beyond equality: the
/// server is the sole version authority, and adapters carry its stamps
/// back and forth unchanged.
pub trait TaskApi: Send + Sync {
    /// Submits an edit for the server to apply against its current state.
    ///
    /// A version mismatch is reported as [`SubmitOutcome::Conflicted`],
    /// not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] for rejections other than a version mismatch
    /// (validation, permission, missing record) and for transport
    /// failures.
    fn submit_edit(
        &self,
        edit: &ClientEdit,
    ) -> impl std::future::Future<Output = Result<SubmitOutcome, ApiError>> + Send;

    /// Fetches the current authoritative snapshot of a task.
    ///
    /// Used when a conflict response does not inline the server snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the task does not exist, or a
    /// transport-level error.
    fn fetch_task(
        &self,
        id: TaskId,
    ) -> impl std::future::Future<Output = Result<Task, ApiError>> + Send;
}

impl<T: TaskApi> TaskApi for std::sync::Arc<T> {
    async fn submit_edit(&self, edit: &ClientEdit) -> Result<SubmitOutcome, ApiError> {
        (**self).submit_edit(edit).await
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, ApiError> {
        (**self).fetch_task(id).await
    }
}
