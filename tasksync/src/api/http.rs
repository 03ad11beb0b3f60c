//! REST adapter for a `TaskSync` server.
//!
//! Maps the HTTP status vocabulary onto [`SubmitOutcome`] and
//! [`ApiError`]: `409 Conflict` is the version-check rejection and never
//! an error, while 4xx validation and permission statuses surface as the
//! matching error variants.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tasksync_proto::api::{
    ConflictBody, CreateTagBody, CreateTaskBody, DeleteTaskBody, ErrorBody, TagEnvelope,
    TagListEnvelope, TaskEnvelope, TaskListEnvelope, UpdateTaskBody,
};
use tasksync_proto::patch::ClientEdit;
use tasksync_proto::task::{Tag, Task, TaskId};

use super::{ApiError, SubmitOutcome, TaskApi};

/// Per-request timeout applied by [`HttpApi::new`].
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for the task server's `/api/v1` surface.
#[derive(Debug, Clone)]
pub struct HttpApi {
    base: String,
    http: reqwest::Client,
}

impl HttpApi {
    /// Creates a client for the server at `base_url` (scheme and
    /// authority, e.g. `http://127.0.0.1:4680`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, http)
    }

    /// Creates a client reusing an existing `reqwest` client.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let mut base = base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Creates a task on the server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if the server rejects the body,
    /// or a transport-level error.
    pub async fn create_task(&self, body: &CreateTaskBody) -> Result<Task, ApiError> {
        let resp = self
            .http
            .post(self.url("/api/v1/tasks"))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(decode::<TaskEnvelope>(resp).await?.task),
            status => Err(plain_error(status, resp).await),
        }
    }

    /// Lists all live tasks.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error if the request fails.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/v1/tasks"))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::OK => Ok(decode::<TaskListEnvelope>(resp).await?.tasks),
            status => Err(plain_error(status, resp).await),
        }
    }

    /// Soft-deletes a task. Deletion is version-checked like any edit, so
    /// the result is a [`SubmitOutcome`] and may be `Conflicted`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] for non-conflict rejections and transport
    /// failures.
    pub async fn delete_task(
        &self,
        id: TaskId,
        body: &DeleteTaskBody,
    ) -> Result<SubmitOutcome, ApiError> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/v1/tasks/{id}")))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::OK => Ok(SubmitOutcome::Applied(
                decode::<TaskEnvelope>(resp).await?.task,
            )),
            StatusCode::CONFLICT => conflicted(resp).await,
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(id)),
            status => Err(plain_error(status, resp).await),
        }
    }

    /// Creates a tag on the server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if the name collides
    /// case-insensitively with an existing tag, or a transport-level
    /// error.
    pub async fn create_tag(&self, body: &CreateTagBody) -> Result<Tag, ApiError> {
        let resp = self
            .http
            .post(self.url("/api/v1/tags"))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(decode::<TagEnvelope>(resp).await?.tag),
            status => Err(plain_error(status, resp).await),
        }
    }

    /// Lists all tags.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error if the request fails.
    pub async fn list_tags(&self) -> Result<Vec<Tag>, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/v1/tags"))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::OK => Ok(decode::<TagListEnvelope>(resp).await?.tags),
            status => Err(plain_error(status, resp).await),
        }
    }
}

impl TaskApi for HttpApi {
    async fn submit_edit(&self, edit: &ClientEdit) -> Result<SubmitOutcome, ApiError> {
        let body = UpdateTaskBody {
            changes: edit.changes.clone(),
            version: edit.base_version,
            client_id: edit.client_id.clone(),
        };
        let resp = self
            .http
            .patch(self.url(&format!("/api/v1/tasks/{}", edit.task_id)))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::OK => Ok(SubmitOutcome::Applied(
                decode::<TaskEnvelope>(resp).await?.task,
            )),
            StatusCode::CONFLICT => conflicted(resp).await,
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(edit.task_id)),
            status => Err(plain_error(status, resp).await),
        }
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/tasks/{id}")))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::OK => Ok(decode::<TaskEnvelope>(resp).await?.task),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(id)),
            status => Err(plain_error(status, resp).await),
        }
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    resp.json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

async fn conflicted(resp: reqwest::Response) -> Result<SubmitOutcome, ApiError> {
    let body: ConflictBody = decode(resp).await?;
    Ok(SubmitOutcome::Conflicted {
        current_version: body.current_version,
        server: body.task,
    })
}

/// Maps non-conflict rejection statuses, using the server's error message
/// when the body carries one.
async fn plain_error(status: StatusCode, resp: reqwest::Response) -> ApiError {
    let message = resp
        .json::<ErrorBody>()
        .await
        .map_or_else(|_| status.to_string(), |body| body.message);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ApiError::Validation(message),
        StatusCode::FORBIDDEN => ApiError::Forbidden(message),
        _ => ApiError::Transport(format!("unexpected status {status}: {message}")),
    }
}

// --- tests ---
