//! In-process mock of the vendor API, served by axum on an ephemeral port.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

pub const JOB_ID: &str = "job-42";
pub const ARTIFACT: &[u8] = b"artifact-bytes";

/// One multipart part as the vendor saw it.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub parts: Vec<Part>,
}

impl Submission {
    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }
}

pub struct Vendor {
    pub submissions: Mutex<Vec<Submission>>,
    /// Status codes served by the result endpoint, in order.
    pub poll_statuses: Mutex<VecDeque<u16>>,
    /// Served once `poll_statuses` is exhausted.
    pub steady_status: u16,
    pub polls: AtomicUsize,
    pub poll_accepts: Mutex<Vec<Option<String>>>,
}

impl Vendor {
    pub fn new(poll_statuses: &[u16]) -> Arc<Self> {
        Self::with_steady(poll_statuses, 200)
    }

    pub fn with_steady(poll_statuses: &[u16], steady_status: u16) -> Arc<Self> {
        Arc::new(Self {
            submissions: Mutex::new(Vec::new()),
            poll_statuses: Mutex::new(poll_statuses.iter().copied().collect()),
            steady_status,
            polls: AtomicUsize::new(0),
            poll_accepts: Mutex::new(Vec::new()),
        })
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn last_submission(&self) -> Submission {
        self.submissions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no submission received")
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn record(vendor: &Vendor, headers: &HeaderMap, mut multipart: Multipart) {
    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.unwrap().to_vec();
        parts.push(Part {
            name,
            file_name,
            bytes,
        });
    }

    vendor.submissions.lock().unwrap().push(Submission {
        authorization: header(headers, "authorization"),
        accept: header(headers, "accept"),
        parts,
    });
}

async fn submit_async(
    State(vendor): State<Arc<Vendor>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    record(&vendor, &headers, multipart).await;
    Json(json!({ "id": JOB_ID })).into_response()
}

async fn submit_sync(
    State(vendor): State<Arc<Vendor>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    record(&vendor, &headers, multipart).await;
    (
        [
            ("content-type", "image/png"),
            ("seed", "31337"),
            ("finish-reason", "SUCCESS"),
        ],
        ARTIFACT.to_vec(),
    )
        .into_response()
}

async fn submit_without_id(
    State(vendor): State<Arc<Vendor>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    record(&vendor, &headers, multipart).await;
    Json(json!({ "status": "queued" })).into_response()
}

async fn submit_rejected(
    State(vendor): State<Arc<Vendor>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    record(&vendor, &headers, multipart).await;
    (
        StatusCode::BAD_REQUEST,
        r#"{"errors":["prompt: cannot be empty"]}"#,
    )
        .into_response()
}

async fn result(
    State(vendor): State<Arc<Vendor>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    vendor.polls.fetch_add(1, Ordering::SeqCst);
    vendor
        .poll_accepts
        .lock()
        .unwrap()
        .push(header(&headers, "accept"));

    let status = vendor
        .poll_statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(vendor.steady_status);

    match status {
        202 => (
            StatusCode::ACCEPTED,
            Json(json!({ "id": id, "status": "in-progress" })),
        )
            .into_response(),
        200 => (
            [("content-type", "video/mp4"), ("seed", "1234")],
            ARTIFACT.to_vec(),
        )
            .into_response(),
        other => (
            StatusCode::from_u16(other).unwrap(),
            Json(json!({ "errors": ["generation failed"] })),
        )
            .into_response(),
    }
}

/// Start the mock vendor and return its base URL.
pub async fn spawn_vendor(vendor: Arc<Vendor>) -> String {
    let app = Router::new()
        .route("/submit", post(submit_async))
        .route("/generate", post(submit_sync))
        .route("/no-id", post(submit_without_id))
        .route("/reject", post(submit_rejected))
        .route("/results/:id", get(result))
        .with_state(vendor);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// Encode a tiny PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(width, height);
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageOutputFormat::Png,
    )
    .unwrap();
    bytes
}
