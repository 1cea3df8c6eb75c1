use std::time::Duration;

use crate::job::JobStatus;

/// Errors surfaced by [`AsyncJobClient`](crate::client::AsyncJobClient).
///
/// Every variant is terminal for the job it was raised on. The client never
/// resubmits on its own; the caller decides whether to start a fresh job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The remote returned a non-success status code.
    #[error("Remote rejected request ({status}): {body}")]
    RemoteRejection {
        /// HTTP status code.
        status: u16,
        /// Raw response body for diagnosis.
        body: String,
    },

    /// A success response did not carry what the job contract requires.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The job was still pending when the poll budget ran out.
    #[error("Job still pending after {:.1}s", elapsed.as_secs_f64())]
    TimeoutExceeded { elapsed: Duration },

    /// `poll` was called on a handle that already reached a terminal state.
    #[error("Job {id} is already {state}")]
    InvalidHandleState { id: String, state: JobStatus },
}

impl From<reqwest::Error> for JobError {
    fn from(err: reqwest::Error) -> Self {
        JobError::Transport(err.to_string())
    }
}

impl JobError {
    /// Build a [`JobError::RemoteRejection`] from a status and raw body bytes.
    pub fn rejection(status: u16, body: &[u8]) -> Self {
        JobError::RemoteRejection {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// `true` for 5xx rejections, the only kind a retry policy may absorb.
    pub fn is_server_error(&self) -> bool {
        matches!(self, JobError::RemoteRejection { status, .. } if *status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_keeps_body_verbatim() {
        let err = JobError::rejection(400, br#"{"errors":["bad seed"]}"#);
        assert_eq!(
            err.to_string(),
            r#"Remote rejected request (400): {"errors":["bad seed"]}"#
        );
        assert!(!err.is_server_error());
    }

    #[test]
    fn server_error_detection() {
        assert!(JobError::rejection(503, b"").is_server_error());
        assert!(!JobError::Protocol("missing id".into()).is_server_error());
    }

    #[test]
    fn timeout_message_reports_elapsed() {
        let err = JobError::TimeoutExceeded {
            elapsed: Duration::from_millis(10_500),
        };
        assert_eq!(err.to_string(), "Job still pending after 10.5s");
    }
}
