//! Submit-then-poll client for long-running generation jobs.
//!
//! A job is submitted once with [`AsyncJobClient::submit`], which returns a
//! [`JobHandle`]. [`AsyncJobClient::poll`] then checks the status endpoint on
//! a fixed interval until the job completes, fails, or the timeout budget is
//! spent. Timeouts are checked between attempts, never mid-request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::job::{JobHandle, JobRequest, JobResult, JobStatus};
use crate::transport::{RawResponse, Transport};

/// Placeholder substituted with the job id in [`JobProtocol::status_url`].
pub const ID_PLACEHOLDER: &str = "{id}";

/// Bearer token for the vendor API. Never printed.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// How a poll response tells the client that the job is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionSignal {
    /// 202 = pending, 200 = complete with the artifact as body, anything
    /// else = failed.
    #[default]
    StatusCode,
    /// A JSON body whose `field` holds the job state. Values listed in
    /// `pending` keep polling, values in `failed` end the job; any other
    /// value means the body is the finished result.
    BodyFlag {
        field: String,
        pending: Vec<String>,
        failed: Vec<String>,
    },
}

/// What to do with a 5xx seen while polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ServerErrorPolicy {
    /// Treat it as terminal failure.
    #[default]
    Fail,
    /// Treat up to `max_retries` consecutive 5xx responses as still pending.
    Retry { max_retries: u32 },
}

impl ServerErrorPolicy {
    /// Build from a retry count, where zero means [`ServerErrorPolicy::Fail`].
    pub fn from_retries(max_retries: u32) -> Self {
        if max_retries == 0 {
            ServerErrorPolicy::Fail
        } else {
            ServerErrorPolicy::Retry { max_retries }
        }
    }

    fn absorbs(&self, consecutive: u32) -> bool {
        match self {
            ServerErrorPolicy::Fail => false,
            ServerErrorPolicy::Retry { max_retries } => consecutive < *max_retries,
        }
    }
}

/// Wire contract for one family of endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProtocol {
    /// Status URL template containing [`ID_PLACEHOLDER`].
    #[serde(default)]
    pub status_url: String,
    /// JSON field in the submission response holding the job id.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Exact id length the vendor promises, if any.
    #[serde(default)]
    pub expected_id_len: Option<usize>,
    #[serde(default)]
    pub completion: CompletionSignal,
    #[serde(default = "default_submit_accept")]
    pub submit_accept: String,
    #[serde(default = "default_result_accept")]
    pub result_accept: String,
    /// Accept header for single-shot [`AsyncJobClient::generate`] calls.
    #[serde(default = "default_sync_accept")]
    pub sync_accept: String,
    /// 5xx handling while polling. `None` defers to the deployment default.
    #[serde(default)]
    pub on_server_error: Option<ServerErrorPolicy>,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_submit_accept() -> String {
    "application/json".to_string()
}

fn default_result_accept() -> String {
    "*/*".to_string()
}

fn default_sync_accept() -> String {
    "image/*".to_string()
}

impl Default for JobProtocol {
    fn default() -> Self {
        Self {
            status_url: String::new(),
            id_field: default_id_field(),
            expected_id_len: None,
            completion: CompletionSignal::default(),
            submit_accept: default_submit_accept(),
            result_accept: default_result_accept(),
            sync_accept: default_sync_accept(),
            on_server_error: None,
        }
    }
}

impl JobProtocol {
    pub fn new(status_url: impl Into<String>) -> Self {
        Self {
            status_url: status_url.into(),
            ..Self::default()
        }
    }

    pub fn with_expected_id_len(mut self, len: usize) -> Self {
        self.expected_id_len = Some(len);
        self
    }

    pub fn with_result_accept(mut self, accept: impl Into<String>) -> Self {
        self.result_accept = accept.into();
        self
    }

    pub fn with_completion(mut self, completion: CompletionSignal) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_server_error_policy(mut self, policy: ServerErrorPolicy) -> Self {
        self.on_server_error = Some(policy);
        self
    }

    /// Policy in effect, falling back to [`ServerErrorPolicy::Fail`].
    pub fn server_error_policy(&self) -> ServerErrorPolicy {
        self.on_server_error.unwrap_or_default()
    }

    pub fn status_url_for(&self, id: &str) -> String {
        self.status_url.replace(ID_PLACEHOLDER, id)
    }
}

/// Generic client for one endpoint family. Cheap to clone; the transport is
/// shared.
#[derive(Clone)]
pub struct AsyncJobClient {
    transport: Arc<dyn Transport>,
    credential: Credential,
    protocol: JobProtocol,
}

impl AsyncJobClient {
    pub fn new(transport: Arc<dyn Transport>, credential: Credential, protocol: JobProtocol) -> Self {
        Self {
            transport,
            credential,
            protocol,
        }
    }

    pub fn protocol(&self) -> &JobProtocol {
        &self.protocol
    }

    /// Submit `request` and return the handle for the queued job.
    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle, JobError> {
        info!(
            url = %request.url,
            fields = request.fields.len(),
            attachments = request.attachments.len(),
            "Submitting async job"
        );

        let response = self
            .transport
            .post_form(request, self.credential.expose(), &self.protocol.submit_accept)
            .await?;

        if !response.is_success() {
            return Err(JobError::rejection(response.status, &response.body));
        }

        let id = self.extract_id(&response.body)?;
        let status_url = self.protocol.status_url_for(&id);
        info!(job_id = %id, "Job accepted");

        Ok(JobHandle::new(id, status_url))
    }

    /// Poll `handle` every `interval` until the job reaches a terminal state
    /// or `timeout` has elapsed since the first attempt.
    ///
    /// The handle is marked terminal on every outcome except cancellation
    /// (dropping the returned future), after which no further requests are
    /// made.
    pub async fn poll(
        &self,
        handle: &mut JobHandle,
        interval: Duration,
        timeout: Duration,
    ) -> Result<JobResult, JobError> {
        if handle.is_terminal() {
            return Err(JobError::InvalidHandleState {
                id: handle.id().to_string(),
                state: handle.state(),
            });
        }

        let outcome = self.poll_until_terminal(handle, interval, timeout).await;
        handle.finish(match &outcome {
            Ok(_) => JobStatus::Complete,
            Err(_) => JobStatus::Failed,
        });
        outcome
    }

    /// `submit` followed by `poll`.
    pub async fn run(
        &self,
        request: JobRequest,
        interval: Duration,
        timeout: Duration,
    ) -> Result<JobResult, JobError> {
        let mut handle = self.submit(request).await?;
        self.poll(&mut handle, interval, timeout).await
    }

    /// Single-shot generation: the POST response body is the artifact.
    pub async fn generate(&self, request: JobRequest) -> Result<JobResult, JobError> {
        info!(url = %request.url, "Sending generation request");

        let response = self
            .transport
            .post_form(request, self.credential.expose(), &self.protocol.sync_accept)
            .await?;

        if !response.is_success() {
            return Err(JobError::rejection(response.status, &response.body));
        }

        Ok(into_result(response))
    }

    async fn poll_until_terminal(
        &self,
        handle: &JobHandle,
        interval: Duration,
        timeout: Duration,
    ) -> Result<JobResult, JobError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut server_errors: u32 = 0;

        loop {
            attempt += 1;
            let response = self
                .transport
                .get(
                    handle.status_url(),
                    self.credential.expose(),
                    &self.protocol.result_accept,
                )
                .await?;

            match self.classify(&response)? {
                JobStatus::Complete => {
                    info!(
                        job_id = %handle.id(),
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job complete"
                    );
                    return Ok(into_result(response));
                }
                JobStatus::Pending => {
                    server_errors = 0;
                    debug!(job_id = %handle.id(), attempt, "Job in progress");
                }
                JobStatus::Failed => {
                    let err = JobError::rejection(response.status, &response.body);
                    if !(err.is_server_error()
                        && self.protocol.server_error_policy().absorbs(server_errors))
                    {
                        return Err(err);
                    }
                    server_errors += 1;
                    warn!(
                        job_id = %handle.id(),
                        status = response.status,
                        server_errors,
                        "Server error while polling, retrying"
                    );
                }
            }

            let elapsed = started.elapsed();
            if elapsed > timeout {
                warn!(job_id = %handle.id(), attempt, "Giving up on job");
                return Err(JobError::TimeoutExceeded { elapsed });
            }

            tokio::time::sleep(interval).await;
        }
    }

    fn classify(&self, response: &RawResponse) -> Result<JobStatus, JobError> {
        match &self.protocol.completion {
            CompletionSignal::StatusCode => Ok(match response.status {
                202 => JobStatus::Pending,
                200 => JobStatus::Complete,
                _ => JobStatus::Failed,
            }),
            CompletionSignal::BodyFlag {
                field,
                pending,
                failed,
            } => {
                if !response.is_success() {
                    return Ok(JobStatus::Failed);
                }
                let body: serde_json::Value = serde_json::from_slice(&response.body)
                    .map_err(|e| JobError::Protocol(format!("status body is not JSON: {e}")))?;
                let flag = body.get(field).and_then(|v| v.as_str()).ok_or_else(|| {
                    JobError::Protocol(format!("status body has no '{field}' field"))
                })?;

                if pending.iter().any(|p| p == flag) {
                    Ok(JobStatus::Pending)
                } else if failed.iter().any(|f| f == flag) {
                    Ok(JobStatus::Failed)
                } else {
                    Ok(JobStatus::Complete)
                }
            }
        }
    }

    fn extract_id(&self, body: &[u8]) -> Result<String, JobError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| JobError::Protocol(format!("submission response is not JSON: {e}")))?;

        let id = value
            .get(&self.protocol.id_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                JobError::Protocol(format!(
                    "expected '{}' in async response",
                    self.protocol.id_field
                ))
            })?;

        if id.is_empty() {
            return Err(JobError::Protocol("job id is empty".to_string()));
        }

        if let Some(expected) = self.protocol.expected_id_len {
            let len = id.chars().count();
            if len != expected {
                return Err(JobError::Protocol(format!(
                    "job id '{id}' is {len} characters long, expected {expected}"
                )));
            }
        }

        Ok(id.to_string())
    }
}

fn into_result(response: RawResponse) -> JobResult {
    JobResult {
        content_type: response.header("content-type").map(str::to_string),
        seed: response.header("seed").and_then(|s| s.trim().parse().ok()),
        finish_reason: response.header("finish-reason").map(str::to_string),
        bytes: response.body,
    }
}
