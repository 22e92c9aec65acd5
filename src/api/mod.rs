//! HTTP API client for the target system.
//!
//! [`ApiClient`] issues JSON requests against the target's API, decodes the
//! structured error envelope into typed [`ApiError::Rejected`] failures, and
//! recognizes asynchronous operations: an HTTP 202 whose payload carries one
//! or more task references becomes [`Operation::Deferred`], which the caller
//! hands to [`tasks::TaskTracker`] for resolution.

/// Asynchronous task tracking.
pub mod tasks;

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::config::Target;
use tasks::Task;

/// Errors raised by API operations.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The target rejected the request with a non-2xx status.
    #[error("API request to '{path}' rejected with status {status}: {detail}")]
    Rejected {
        /// Request path
        path: String,
        /// HTTP status code
        status: u16,
        /// Decoded error detail (structured envelope when present, else raw body)
        detail: String,
    },

    /// The target API could not be reached or the exchange failed.
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The path could not be joined onto the target's base URL.
    #[error("invalid API path '{path}': {message}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// Error message
        message: String,
    },

    /// A 2xx response body did not decode as expected.
    #[error("unexpected response body from '{path}': {message}")]
    UnexpectedBody {
        /// Request path
        path: String,
        /// Error message
        message: String,
    },
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Reference to a server-side task, as returned by the target's API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskRef(pub String);

impl TaskRef {
    /// The reference as a request path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one HTTP operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// The request finished synchronously with this payload.
    Completed(Value),
    /// The request spawned server-side tasks that must be tracked to a
    /// terminal state before the operation is resolved.
    Deferred(Vec<TaskRef>),
}

impl Operation {
    /// Task references held by a deferred operation.
    pub fn task_refs(&self) -> &[TaskRef] {
        match self {
            Operation::Completed(_) => &[],
            Operation::Deferred(refs) => refs,
        }
    }

    /// The synchronous payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Operation::Completed(payload) => Some(payload),
            Operation::Deferred(_) => None,
        }
    }
}

/// Structured error envelope used by the target for rejections.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    detail: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

impl ErrorEnvelope {
    fn into_detail(self) -> Option<String> {
        match (self.detail, self.errors) {
            (Some(detail), errors) if errors.is_empty() => Some(detail),
            (Some(detail), errors) => Some(format!("{} ({})", detail, errors.join("; "))),
            (None, errors) if !errors.is_empty() => Some(errors.join("; ")),
            (None, _) => None,
        }
    }
}

/// HTTP client bound to one target's API.
#[derive(Clone)]
pub struct ApiClient {
    target: Arc<Target>,
    http: reqwest::Client,
}

impl ApiClient {
    /// Build a client for the target.
    pub fn new(target: Arc<Target>) -> ApiResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { target, http })
    }

    /// The target this client talks to.
    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// GET convenience.
    pub async fn get(&self, path: &str) -> ApiResult<Operation> {
        self.request(Method::GET, path, None, &[]).await
    }

    /// POST convenience.
    pub async fn post(&self, path: &str, body: Value) -> ApiResult<Operation> {
        self.request(Method::POST, path, Some(body), &[]).await
    }

    /// PUT convenience.
    pub async fn put(&self, path: &str, body: Value) -> ApiResult<Operation> {
        self.request(Method::PUT, path, Some(body), &[]).await
    }

    /// DELETE convenience.
    pub async fn delete(&self, path: &str) -> ApiResult<Operation> {
        self.request(Method::DELETE, path, None, &[]).await
    }

    /// Issue a request and classify the response.
    ///
    /// Non-2xx responses raise [`ApiError::Rejected`] with the decoded error
    /// envelope. A 202 whose payload names task references yields
    /// [`Operation::Deferred`]; every other 2xx yields
    /// [`Operation::Completed`] (empty body decodes as JSON null).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> ApiResult<Operation> {
        let url = self.endpoint(path)?;
        debug!(target = %self.target.name, method = %method, path = %path, "API request");

        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&self.target.api.username, Some(&self.target.api.password));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(self.rejection(path, status, &text));
        }

        let payload = decode_body(path, &text)?;
        trace!(status = %status.as_u16(), "API response");

        if status == StatusCode::ACCEPTED {
            let refs = extract_task_refs(&payload);
            if !refs.is_empty() {
                debug!(tasks = %refs.len(), "Operation deferred to server-side tasks");
                return Ok(Operation::Deferred(refs));
            }
        }
        Ok(Operation::Completed(payload))
    }

    /// Fetch the current status of one task.
    pub async fn task_status(&self, task_ref: &TaskRef) -> ApiResult<Task> {
        let url = self.endpoint(task_ref.as_str())?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.target.api.username, Some(&self.target.api.password))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(self.rejection(task_ref.as_str(), status, &text));
        }

        let mut task: Task =
            serde_json::from_str(&text).map_err(|e| ApiError::UnexpectedBody {
                path: task_ref.as_str().to_string(),
                message: format!("task status did not decode: {}", e),
            })?;
        if task.id.is_empty() {
            task.id = task_ref.as_str().to_string();
        }
        Ok(task)
    }

    /// Relative paths resolve under the base URL's own path; server-absolute
    /// hrefs (leading `/`, as task references are) resolve at the host root.
    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.target
            .api
            .base_url
            .join(path)
            .map_err(|e| ApiError::InvalidPath {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    fn rejection(&self, path: &str, status: StatusCode, body: &str) -> ApiError {
        let detail = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(ErrorEnvelope::into_detail)
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    "(no error detail)".to_string()
                } else {
                    trimmed.to_string()
                }
            });
        ApiError::Rejected {
            path: path.to_string(),
            status: status.as_u16(),
            detail,
        }
    }
}

fn decode_body(path: &str, text: &str) -> ApiResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ApiError::UnexpectedBody {
        path: path.to_string(),
        message: format!("body is not valid JSON: {}", e),
    })
}

/// Pull task references out of an asynchronous-operation payload.
///
/// The shape is either a single `task` string or a `tasks` array of strings.
fn extract_task_refs(payload: &Value) -> Vec<TaskRef> {
    let mut refs = Vec::new();
    if let Some(task) = payload.get("task").and_then(Value::as_str) {
        refs.push(TaskRef(task.to_string()));
    }
    if let Some(tasks) = payload.get("tasks").and_then(Value::as_array) {
        refs.extend(
            tasks
                .iter()
                .filter_map(Value::as_str)
                .map(|t| TaskRef(t.to_string())),
        );
    }
    refs
}
