//! HTTP review transport
//!
//! Talks JSON to a review backend:
//! - `GET   {base}/documents/{id}/file`   source PDF bytes
//! - `PATCH {base}/documents/{id}/review` `{action, notes?, annotations? | bakedFile?}`
//! - `PATCH {base}/documents/{id}/draft`  `{annotations}`

use crate::annotation::{Annotation, DocumentId};
use crate::config::TransportSettings;
use crate::transport::{Ack, ReviewSubmission, ReviewTransport, SubmissionPayload, TransportError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewBody<'a> {
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a [Annotation]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    baked_file: Option<String>,
}

impl<'a> ReviewBody<'a> {
    fn new(submission: &'a ReviewSubmission) -> Self {
        let (annotations, baked_file) = match submission.payload() {
            Some(SubmissionPayload::Annotations(list)) => (Some(list.as_slice()), None),
            Some(SubmissionPayload::BakedFile(bytes)) => (None, Some(BASE64.encode(bytes))),
            None => (None, None),
        };
        Self { action: submission.action().as_str(), notes: submission.notes(), annotations, baked_file }
    }
}

#[derive(Debug, Serialize)]
struct DraftBody<'a> {
    annotations: &'a [Annotation],
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build from configuration; a base URL is required
    pub fn from_settings(settings: &TransportSettings) -> Result<Self, TransportError> {
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or_else(|| TransportError::Connection("no review backend base URL configured".into()))?;
        Self::new(base_url, Duration::from_secs(settings.timeout_secs))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, document_id: &DocumentId, leaf: &str) -> String {
        format!("{}/documents/{}/{}", self.base_url, urlencoding::encode(document_id.as_str()), leaf)
    }

    async fn check(
        document_id: &DocumentId,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(document_id, status.as_u16(), message))
    }

    async fn ack(document_id: &DocumentId, response: reqwest::Response) -> Result<Ack, TransportError> {
        let response = Self::check(document_id, response).await?;
        let body = response.bytes().await.map_err(map_reqwest)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Ack::default());
        }
        serde_json::from_slice(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ReviewTransport for HttpTransport {
    async fn source_bytes(&self, document_id: &DocumentId) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(self.url(document_id, "file"))
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = Self::check(document_id, response).await?;
        let bytes = response.bytes().await.map_err(map_reqwest)?;
        Ok(bytes.to_vec())
    }

    async fn submit_review(
        &self,
        document_id: &DocumentId,
        submission: &ReviewSubmission,
    ) -> Result<Ack, TransportError> {
        tracing::info!(document = %document_id, action = %submission.action(), "submitting review");
        let response = self
            .client
            .patch(self.url(document_id, "review"))
            .json(&ReviewBody::new(submission))
            .send()
            .await
            .map_err(map_reqwest)?;
        Self::ack(document_id, response).await
    }

    async fn save_draft(
        &self,
        document_id: &DocumentId,
        annotations: &[Annotation],
    ) -> Result<Ack, TransportError> {
        let response = self
            .client
            .patch(self.url(document_id, "draft"))
            .json(&DraftBody { annotations })
            .send()
            .await
            .map_err(map_reqwest)?;
        Self::ack(document_id, response).await
    }
}

fn map_reqwest(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if let Some(status) = error.status() {
        TransportError::Server { status: status.as_u16(), message: error.to_string() }
    } else if error.is_decode() {
        TransportError::InvalidResponse(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

fn classify_status(document_id: &DocumentId, status: u16, message: String) -> TransportError {
    match status {
        404 => TransportError::NotFound(document_id.clone()),
        408 | 429 => TransportError::Server { status, message },
        500..=599 => TransportError::Server { status, message },
        _ => TransportError::Rejected { status, message },
    }
}
