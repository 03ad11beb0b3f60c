//! Conflict orchestration across tasks.
//!
//! [`ConflictManager`] owns the session table (at most one session per
//! task), drives the I/O the sessions themselves stay pure of, and emits
//! [`ConflictEvent`]s for the UI layer. Locks are never held across
//! network calls: the session is re-locked afterwards and every result is
//! validated against the session generation before it is applied.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tasksync_proto::patch::{ClientEdit, TaskField, TaskPatch};
use tasksync_proto::task::{ClientId, Task, TaskId, Version};
use tokio::sync::{Mutex, mpsc};

use super::ConflictError;
use super::detect::{self, ConflictKind, Detection};
use super::diff::ComparisonRow;
use super::resolve::{Resolution, Side};
use super::session::{Choice, ConflictSession, SessionState, Staged};
use crate::api::{ApiError, TaskApi};
use crate::cache::TaskCache;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tunables for conflict orchestration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Capacity of the event channel handed back by
    /// [`ConflictManager::new`].
    pub event_buffer: usize,
    /// Resubmit version-only conflicts immediately instead of parking
    /// them in `Resolved` until acknowledged.
    pub auto_resolve_version_only: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            auto_resolve_version_only: true,
        }
    }
}

/// Notifications emitted as conflicts are detected and closed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictEvent {
    /// A conflict finished detection and needs attention: a resolution
    /// choice for field-level conflicts, an acknowledgement for
    /// version-only ones (when auto-resolve is off).
    ConflictDetected {
        task_id: TaskId,
        kind: ConflictKind,
        rows: Vec<ComparisonRow>,
    },
    /// A session finished.
    SessionClosed {
        task_id: TaskId,
        outcome: SessionOutcome,
    },
}

/// Terminal outcome of a conflict session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The record is consistent again at this version.
    Applied { version: Version },
    /// The conflict was abandoned; nothing was written.
    Cancelled,
    /// The session could not make progress.
    Failed { reason: String },
}

/// What a submit or resolution call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// The record is consistent: the edit (or resolution) is reflected in
    /// this snapshot.
    Applied(Task),
    /// A conflict session is open and waiting, for input or for
    /// acknowledgement.
    ConflictPending {
        kind: ConflictKind,
        rows: Vec<ComparisonRow>,
    },
}

/// Orchestrates conflict sessions over a server adapter and the client's
/// task cache.
#[derive(Debug)]
pub struct ConflictManager<A, C> {
    api: A,
    cache: C,
    client_id: ClientId,
    auto_resolve_version_only: bool,
    sessions: Mutex<HashMap<TaskId, ConflictSession>>,
    event_tx: mpsc::Sender<ConflictEvent>,
}

/// What happened to a staged resubmission.
enum StagedResult {
    Applied(Task),
    Reopened {
        generation: u64,
        inline: Option<Task>,
    },
}

impl<A: TaskApi, C: TaskCache> ConflictManager<A, C> {
    /// Creates a manager and the receiving end of its event channel.
    pub fn new(
        api: A,
        cache: C,
        client_id: ClientId,
        config: ManagerConfig,
    ) -> (Self, mpsc::Receiver<ConflictEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        (
            Self {
                api,
                cache,
                client_id,
                auto_resolve_version_only: config.auto_resolve_version_only,
                sessions: Mutex::new(HashMap::new()),
                event_tx,
            },
            event_rx,
        )
    }

    /// The identity this manager attributes edits to.
    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Builds an edit attributed to this client against a snapshot,
    /// minimized so fields equal to the snapshot drop out.
    #[must_use]
    pub fn edit_against(&self, snapshot: &Task, changes: TaskPatch) -> ClientEdit {
        ClientEdit::against(snapshot, changes, self.client_id.clone())
    }

    /// Submits an edit. A version-check rejection opens a conflict
    /// session for the task (or feeds the already-open one) and runs
    /// detection; the returned outcome says whether the record ended up
    /// consistent or a conflict is pending.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::Api`] for non-conflict rejections,
    /// [`ConflictError::SnapshotFetch`] when the authoritative snapshot
    /// cannot be loaded, and [`ConflictError::Superseded`] when the
    /// session was cancelled or reopened underneath this call.
    pub async fn submit(&self, edit: ClientEdit) -> Result<EditOutcome, ConflictError> {
        let task_id = edit.task_id;
        let outcome = self.api.submit_edit(&edit).await?;
        match detect::classify(task_id, outcome) {
            Detection::Applied(task) => {
                // a concurrent session for this task, if any, is moot now
                if self.remove_session(task_id).await {
                    self.signal_closed(
                        task_id,
                        SessionOutcome::Applied {
                            version: task.version,
                        },
                    )
                    .await;
                }
                Ok(EditOutcome::Applied(task))
            }
            Detection::Conflicted {
                current_version,
                inline,
            } => {
                let generation = self.open_or_coalesce(edit, current_version).await;
                self.run_detection(task_id, generation, inline).await
            }
        }
    }

    /// Applies a resolution choice to the task's open session. When the
    /// resolved state already equals the server state the session closes
    /// with no network call; otherwise the resolution is submitted and
    /// may itself conflict, reopening the session.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::NoSession`] when the task has no open
    /// session and [`ConflictError::WrongState`] when it is not awaiting
    /// input, plus the submit-path errors of [`ConflictManager::submit`].
    pub async fn resolve(
        &self,
        task_id: TaskId,
        resolution: &Resolution,
    ) -> Result<EditOutcome, ConflictError> {
        let choice = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(&task_id) else {
                return Err(ConflictError::NoSession(task_id));
            };
            let choice = session.choose(resolution)?;
            if matches!(choice, Choice::AlreadyConsistent(_)) {
                sessions.remove(&task_id);
            }
            choice
        };
        self.drive_choice(task_id, choice).await
    }

    /// Confirms a version-only conflict: resubmits the original changes
    /// against the current server version.
    ///
    /// Only needed when auto-resolve is off; with it on, the manager
    /// acknowledges internally during detection.
    ///
    /// # Errors
    ///
    /// Same error surface as [`ConflictManager::resolve`].
    pub async fn acknowledge(&self, task_id: TaskId) -> Result<EditOutcome, ConflictError> {
        let choice = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(&task_id) else {
                return Err(ConflictError::NoSession(task_id));
            };
            let choice = session.acknowledge()?;
            if matches!(choice, Choice::AlreadyConsistent(_)) {
                sessions.remove(&task_id);
            }
            choice
        };
        self.drive_choice(task_id, choice).await
    }

    /// Abandons the task's open session without writing anything. Any
    /// in-flight fetch or resubmission for the session is discarded when
    /// it returns.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::NoSession`] when the task has no open
    /// session.
    pub async fn cancel(&self, task_id: TaskId) -> Result<(), ConflictError> {
        {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(&task_id) else {
                return Err(ConflictError::NoSession(task_id));
            };
            session.cancel();
            sessions.remove(&task_id);
        }
        self.signal_closed(task_id, SessionOutcome::Cancelled).await;
        Ok(())
    }

    /// Where the session for a task stands; [`SessionState::Idle`] when
    /// none is open.
    pub async fn state(&self, task_id: TaskId) -> SessionState {
        self.sessions
            .lock()
            .await
            .get(&task_id)
            .map_or(SessionState::Idle, ConflictSession::state)
    }

    /// The comparison rows for a task's open conflict, once detection has
    /// completed.
    pub async fn rows(&self, task_id: TaskId) -> Option<Vec<ComparisonRow>> {
        self.sessions
            .lock()
            .await
            .get(&task_id)
            .and_then(ConflictSession::rows_snapshot)
    }

    /// Remembered merge selections for a task's open conflict. Preserved
    /// across reopens for fields that still differ.
    pub async fn selections(&self, task_id: TaskId) -> BTreeMap<TaskField, Side> {
        self.sessions
            .lock()
            .await
            .get(&task_id)
            .map(ConflictSession::selections)
            .unwrap_or_default()
    }

    /// Tasks with open conflict sessions.
    pub async fn open_sessions(&self) -> Vec<TaskId> {
        self.sessions.lock().await.keys().copied().collect()
    }

    // --- internals ---

    /// Opens a session for a rejected edit, or folds the edit into the
    /// task's existing session. Returns the generation guarding the
    /// detection that must follow.
    async fn open_or_coalesce(&self, edit: ClientEdit, current_version: Version) -> u64 {
        // read the cache before taking the session lock
        let stale = self.cache.get(edit.task_id).await;
        let mut sessions = self.sessions.lock().await;
        match sessions.entry(edit.task_id) {
            Entry::Occupied(mut entry) => entry.get_mut().coalesce(&edit, current_version),
            Entry::Vacant(entry) => entry
                .insert(ConflictSession::open(edit, stale, current_version))
                .generation(),
        }
    }

    /// Runs detection for a session: obtains the authoritative snapshot,
    /// classifies the conflict, and either reports it or (for
    /// version-only conflicts with auto-resolve on) resubmits
    /// immediately. Loops because a resubmission may conflict again.
    async fn run_detection(
        &self,
        task_id: TaskId,
        mut generation: u64,
        mut inline: Option<Task>,
    ) -> Result<EditOutcome, ConflictError> {
        loop {
            // 1. Obtain the server snapshot, outside any lock.
            let snapshot = match inline.take() {
                Some(task) => task,
                None => match self.api.fetch_task(task_id).await {
                    Ok(task) => task,
                    Err(err) => {
                        if self.fail_session(task_id, generation, &err).await {
                            return Err(ConflictError::SnapshotFetch(err));
                        }
                        return Err(ConflictError::Superseded(task_id));
                    }
                },
            };

            // 2. Re-lock and apply it, unless the session moved on.
            let staged = {
                let mut sessions = self.sessions.lock().await;
                let Some(session) = sessions.get_mut(&task_id) else {
                    return Err(ConflictError::Superseded(task_id));
                };
                let Some(kind) = session.snapshot_ready(generation, snapshot) else {
                    return Err(ConflictError::Superseded(task_id));
                };
                let rows = session.rows_snapshot().unwrap_or_default();
                match kind {
                    ConflictKind::FieldLevel => {
                        self.emit(ConflictEvent::ConflictDetected {
                            task_id,
                            kind,
                            rows: rows.clone(),
                        });
                        return Ok(EditOutcome::ConflictPending { kind, rows });
                    }
                    ConflictKind::VersionOnly if !self.auto_resolve_version_only => {
                        self.emit(ConflictEvent::ConflictDetected {
                            task_id,
                            kind,
                            rows: rows.clone(),
                        });
                        return Ok(EditOutcome::ConflictPending { kind, rows });
                    }
                    ConflictKind::VersionOnly => match session.acknowledge()? {
                        Choice::Submit(staged) => staged,
                        Choice::AlreadyConsistent(task) => {
                            sessions.remove(&task_id);
                            drop(sessions);
                            let version = task.version;
                            self.signal_closed(task_id, SessionOutcome::Applied { version })
                                .await;
                            return Ok(EditOutcome::Applied(task));
                        }
                    },
                }
            };

            // 3. Resubmit outside the lock; a re-conflict restarts the loop.
            match self.submit_staged(task_id, staged).await? {
                StagedResult::Applied(task) => return Ok(EditOutcome::Applied(task)),
                StagedResult::Reopened {
                    generation: next,
                    inline: server,
                } => {
                    generation = next;
                    inline = server;
                }
            }
        }
    }

    /// Completes a resolution or acknowledgement choice.
    async fn drive_choice(
        &self,
        task_id: TaskId,
        choice: Choice,
    ) -> Result<EditOutcome, ConflictError> {
        match choice {
            Choice::AlreadyConsistent(task) => {
                let version = task.version;
                self.signal_closed(task_id, SessionOutcome::Applied { version })
                    .await;
                Ok(EditOutcome::Applied(task))
            }
            Choice::Submit(staged) => match self.submit_staged(task_id, staged).await? {
                StagedResult::Applied(task) => Ok(EditOutcome::Applied(task)),
                StagedResult::Reopened { generation, inline } => {
                    self.run_detection(task_id, generation, inline).await
                }
            },
        }
    }

    /// Submits a staged resubmission and records its outcome on the
    /// session, subject to the generation guard.
    async fn submit_staged(
        &self,
        task_id: TaskId,
        staged: Staged,
    ) -> Result<StagedResult, ConflictError> {
        let Staged { edit, generation } = staged;
        let outcome = match self.api.submit_edit(&edit).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut sessions = self.sessions.lock().await;
                if let Some(session) = sessions.get_mut(&task_id) {
                    session.submission_failed(generation);
                }
                return Err(ConflictError::Api(err));
            }
        };
        match detect::classify(task_id, outcome) {
            Detection::Applied(task) => {
                let closed = {
                    let mut sessions = self.sessions.lock().await;
                    match sessions.get_mut(&task_id) {
                        Some(session) => {
                            if session.submission_applied(generation) {
                                sessions.remove(&task_id);
                                true
                            } else {
                                false
                            }
                        }
                        None => false,
                    }
                };
                if !closed {
                    return Err(ConflictError::Superseded(task_id));
                }
                self.signal_closed(
                    task_id,
                    SessionOutcome::Applied {
                        version: task.version,
                    },
                )
                .await;
                Ok(StagedResult::Applied(task))
            }
            Detection::Conflicted {
                current_version,
                inline,
            } => {
                let mut sessions = self.sessions.lock().await;
                let Some(session) = sessions.get_mut(&task_id) else {
                    return Err(ConflictError::Superseded(task_id));
                };
                session
                    .submission_conflicted(generation, edit, current_version)
                    .map_or(Err(ConflictError::Superseded(task_id)), |next| {
                        Ok(StagedResult::Reopened {
                            generation: next,
                            inline,
                        })
                    })
            }
        }
    }

    /// Closes the session as failed, if the failing fetch was still
    /// current.
    async fn fail_session(&self, task_id: TaskId, generation: u64, err: &ApiError) -> bool {
        let failed = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(&task_id) {
                Some(session) => {
                    if session.fetch_failed(generation) {
                        sessions.remove(&task_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if failed {
            self.signal_closed(
                task_id,
                SessionOutcome::Failed {
                    reason: err.to_string(),
                },
            )
            .await;
        }
        failed
    }

    async fn remove_session(&self, task_id: TaskId) -> bool {
        self.sessions.lock().await.remove(&task_id).is_some()
    }

    /// Post-close bookkeeping: tell the cache owner to refetch and notify
    /// listeners. The session must already be out of the table.
    async fn signal_closed(&self, task_id: TaskId, outcome: SessionOutcome) {
        self.cache.invalidate(task_id).await;
        self.emit(ConflictEvent::SessionClosed { task_id, outcome });
    }

    fn emit(&self, event: ConflictEvent) {
        // best effort; the receiver may be slow or gone
        let _ = self.event_tx.try_send(event);
    }
}

// --- tests ---
