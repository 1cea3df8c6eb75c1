//! Relay for long-running generative media jobs.
//!
//! The core is [`client::AsyncJobClient`]: submit a request, get a job id
//! back, poll the status endpoint until the artifact is ready. Around it sit
//! per-capability endpoint profiles, environment configuration and an axum
//! relay server.

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod server;
pub mod transport;

pub use client::{AsyncJobClient, CompletionSignal, Credential, JobProtocol, ServerErrorPolicy};
pub use error::JobError;
pub use job::{FieldValue, JobHandle, JobRequest, JobResult, JobStatus};
pub use transport::{RawResponse, ReqwestTransport, Transport};
