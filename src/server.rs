//! HTTP relay in front of the vendor capabilities.
//!
//! A caller uploads form fields and images to `/generate/:capability`; the
//! relay forwards them, waits for the job and answers with the artifact as
//! base64 JSON.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::capability::{index_profiles, CapabilityProfile, DeliveryMode};
use crate::client::{AsyncJobClient, Credential};
use crate::config::AppConfig;
use crate::error::JobError;
use crate::job::JobRequest;
use crate::transport::{ReqwestTransport, Transport};

/// Upload cap for a single generate request.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    profiles: Arc<BTreeMap<String, CapabilityProfile>>,
    transport: Arc<dyn Transport>,
    credential: Credential,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl AppState {
    pub fn new(
        profiles: Vec<CapabilityProfile>,
        transport: Arc<dyn Transport>,
        credential: Credential,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            profiles: Arc::new(index_profiles(profiles)),
            transport,
            credential,
            poll_interval,
            poll_timeout,
        }
    }

    /// State for the real vendor. Profiles that do not choose a 5xx policy
    /// of their own inherit the configured one.
    pub fn from_config(config: &AppConfig, mut profiles: Vec<CapabilityProfile>) -> Self {
        let policy = config.server_error_policy();
        for profile in &mut profiles {
            if profile.protocol.on_server_error.is_none() {
                profile.protocol.on_server_error = Some(policy);
            }
        }

        Self::new(
            profiles,
            Arc::new(ReqwestTransport::new()),
            Credential::new(config.api_key.clone()),
            config.poll_interval,
            config.poll_timeout,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilitySummary {
    pub name: String,
    pub mode: DeliveryMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub capability: String,
    pub job_id: Option<String>,
    pub media_type: Option<String>,
    pub seed: Option<u64>,
    pub finish_reason: Option<String>,
    pub data_base64: String,
    pub processing_time_ms: u64,
}

/// Application-level error type for handlers, rendered as
/// `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Job(job) => match job {
                JobError::RemoteRejection {
                    status: 401 | 403, ..
                } => (StatusCode::BAD_GATEWAY, "REMOTE_REJECTED"),
                JobError::RemoteRejection { status, .. } if (400..500).contains(status) => (
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                    "REMOTE_REJECTED",
                ),
                JobError::RemoteRejection { .. } => (StatusCode::BAD_GATEWAY, "REMOTE_REJECTED"),
                JobError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
                JobError::Protocol(_) => (StatusCode::BAD_GATEWAY, "PROTOCOL_ERROR"),
                JobError::TimeoutExceeded { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                JobError::InvalidHandleState { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INVALID_HANDLE_STATE")
                }
            },
            AppError::UnknownCapability(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            error!(error = %self, "Generation failed");
        }

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/capabilities", get(capabilities))
        .route("/generate/:capability", post(generate))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn capabilities(State(state): State<AppState>) -> Json<Vec<CapabilitySummary>> {
    Json(
        state
            .profiles
            .values()
            .map(|p| CapabilitySummary {
                name: p.name.clone(),
                mode: p.mode,
            })
            .collect(),
    )
}

async fn generate(
    State(state): State<AppState>,
    Path(capability): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Json<GenerateResponse>> {
    let start = std::time::Instant::now();

    let profile = state
        .profiles
        .get(&capability)
        .ok_or_else(|| AppError::UnknownCapability(capability.clone()))?;

    let request = read_request(profile, &mut multipart).await?;
    let client = AsyncJobClient::new(
        state.transport.clone(),
        state.credential.clone(),
        profile.protocol.clone(),
    );

    let (job_id, result) = match profile.mode {
        DeliveryMode::Sync => (None, client.generate(request).await?),
        DeliveryMode::Async => {
            let mut handle = client.submit(request).await?;
            let result = client
                .poll(&mut handle, state.poll_interval, state.poll_timeout)
                .await?;
            (Some(handle.id().to_string()), result)
        }
    };

    Ok(Json(GenerateResponse {
        capability,
        job_id,
        media_type: result.content_type,
        seed: result.seed,
        finish_reason: result.finish_reason,
        data_base64: general_purpose::STANDARD.encode(&result.bytes),
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

/// Text parts become form fields, parts with a file name become attachments.
/// Empty uploads are dropped.
async fn read_request(
    profile: &CapabilityProfile,
    multipart: &mut Multipart,
) -> AppResult<JobRequest> {
    let mut request = JobRequest::new(profile.submit_url.clone());

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                if data.is_empty() {
                    continue;
                }
                let data = match profile.resize {
                    Some((width, height)) => resize_image(&data, width, height)?,
                    None => data.to_vec(),
                };
                request = request.attachment_named(name, file_name, data);
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                request = request.field(name, text);
            }
        }
    }

    Ok(request)
}

fn resize_image(data: &[u8], width: u32, height: u32) -> AppResult<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| AppError::BadRequest(format!("invalid image: {e}")))?;
    let resized = img.resize_exact(width, height, image::imageops::FilterType::Lanczos3);

    let mut png = Vec::new();
    resized
        .write_to(
            &mut std::io::Cursor::new(&mut png),
            image::ImageOutputFormat::Png,
        )
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(png)
}
