//! Read-only seam to the externally owned task collection.
//!
//! The conflict subsystem never manages the client's task cache; it only
//! reads the pre-edit snapshot a conflict should be compared against, and
//! signals the owner to refetch once a session closes. A snapshot may be
//! absent (evicted or never loaded); comparison degrades rather than
//! fails in that case.

use std::collections::HashMap;

use parking_lot::Mutex;
use tasksync_proto::task::{Task, TaskId};

/// Read access to the task snapshots the rest of the client holds.
pub trait TaskCache: Send + Sync {
    /// The cached snapshot for a task, if one is held.
    fn get(&self, id: TaskId) -> impl std::future::Future<Output = Option<Task>> + Send;

    /// Signals that the cached snapshot for a task is stale and should be
    /// refetched. Called after a conflict session closes.
    fn invalidate(&self, id: TaskId) -> impl std::future::Future<Output = ()> + Send;
}

impl<T: TaskCache> TaskCache for std::sync::Arc<T> {
    async fn get(&self, id: TaskId) -> Option<Task> {
        (**self).get(id).await
    }

    async fn invalidate(&self, id: TaskId) {
        (**self).invalidate(id).await;
    }
}

/// Map-backed cache for tests and the demo driver.
///
/// Records every invalidation so tests can assert the close-time signal
/// actually fired.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    tasks: Mutex<HashMap<TaskId, Task>>,
    invalidated: Mutex<Vec<TaskId>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a snapshot.
    pub fn insert(&self, task: Task) {
        self.tasks.lock().insert(task.id, task);
    }

    /// Every invalidation signal received, in order.
    #[must_use]
    pub fn invalidations(&self) -> Vec<TaskId> {
        self.invalidated.lock().clone()
    }
}

impl TaskCache for InMemoryCache {
    async fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().get(&id).cloned()
    }

    async fn invalidate(&self, id: TaskId) {
        self.tasks.lock().remove(&id);
        self.invalidated.lock().push(id);
    }
}

// --- tests ---
