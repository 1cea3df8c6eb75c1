//! HTTP seam under the job client.
//!
//! [`ReqwestTransport`] talks to the real vendor. Tests swap in a scripted
//! implementation so the polling state machine can run on a paused clock.

use std::collections::HashMap;

use reqwest::multipart::{Form, Part};

use crate::error::JobError;
use crate::job::JobRequest;

/// Multipart part sent when a request carries no attachments.
pub const PLACEHOLDER_PART: &str = "none";

/// Status, lower-cased headers and body of one HTTP exchange.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// POST `request` as a multipart form.
    async fn post_form(
        &self,
        request: JobRequest,
        bearer: &str,
        accept: &str,
    ) -> Result<RawResponse, JobError>;

    /// GET `url`.
    async fn get(&self, url: &str, bearer: &str, accept: &str) -> Result<RawResponse, JobError>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing client (connection pooling across profiles).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn collect(response: reqwest::Response) -> Result<RawResponse, JobError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Build the multipart body, substituting the empty placeholder part when
/// the request has no attachments.
pub fn build_form(request: JobRequest) -> Form {
    let mut form = Form::new();
    for (name, value) in request.fields {
        form = form.text(name, value.to_form_text());
    }

    if request.attachments.is_empty() {
        form = form.part(
            PLACEHOLDER_PART,
            Part::bytes(Vec::new()).file_name(PLACEHOLDER_PART),
        );
    } else {
        for attachment in request.attachments {
            form = form.part(
                attachment.name,
                Part::bytes(attachment.bytes).file_name(attachment.file_name),
            );
        }
    }

    form
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn post_form(
        &self,
        request: JobRequest,
        bearer: &str,
        accept: &str,
    ) -> Result<RawResponse, JobError> {
        let url = request.url.clone();
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header("Accept", accept)
            .multipart(build_form(request))
            .send()
            .await?;

        Self::collect(response).await
    }

    async fn get(&self, url: &str, bearer: &str, accept: &str) -> Result<RawResponse, JobError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(bearer)
            .header("Accept", accept)
            .send()
            .await?;

        Self::collect(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut response = RawResponse {
            status: 200,
            ..Default::default()
        };
        response.headers.insert("seed".into(), "1234".into());
        assert_eq!(response.header("Seed"), Some("1234"));
        assert!(response.is_success());
    }

    #[test]
    fn accepted_is_success_but_redirect_is_not() {
        let accepted = RawResponse {
            status: 202,
            ..Default::default()
        };
        let redirect = RawResponse {
            status: 302,
            ..Default::default()
        };
        assert!(accepted.is_success());
        assert!(!redirect.is_success());
    }
}
