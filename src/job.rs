//! Job data model: what goes out on submission, what comes back on poll.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar form field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Text sent on the wire for this value.
    pub fn to_form_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Binary part of a submission, fully materialized in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Multipart field name, e.g. `image` or `subject_image`.
    pub name: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A single generation request. Consumed once by `submit` or `generate`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub url: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub attachments: Vec<Attachment>,
}

impl JobRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fields: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }

    /// Add or replace a form field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Add a binary attachment. The file name defaults to the field name.
    pub fn attachment(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        self.attachments.push(Attachment {
            file_name: name.clone(),
            name,
            bytes,
        });
        self
    }

    pub fn attachment_named(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            name: name.into(),
            file_name: file_name.into(),
            bytes,
        });
        self
    }
}

/// State of a remote job, either as seen by one status check or as the
/// lifecycle state of a [`JobHandle`]. A handle leaves `Pending` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Complete,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Server-assigned job identifier plus the client-side tracking state.
///
/// Only `submit` creates handles, and it never creates one with an empty id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    id: String,
    status_url: String,
    state: JobStatus,
}

impl JobHandle {
    pub(crate) fn new(id: String, status_url: String) -> Self {
        Self {
            id,
            status_url,
            state: JobStatus::Pending,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub fn state(&self) -> JobStatus {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state != JobStatus::Pending
    }

    pub(crate) fn finish(&mut self, state: JobStatus) {
        self.state = state;
    }
}

/// Finished artifact and the metadata the server echoed alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Revised seed from the `seed` response header.
    pub seed: Option<u64>,
    pub finish_reason: Option<String>,
}
