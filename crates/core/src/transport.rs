//! Review backend contract
//!
//! `ReviewTransport` is the seam to whatever stores documents and receives
//! review outcomes. `TransportAdapter` wraps an implementation with the
//! retry policy for idempotent reads; submissions are never retried.

use crate::annotation::{Annotation, DocumentId};
use async_trait::async_trait;
use redline_scheduler::{retry, CancellationToken, RetryError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Outcome a reviewer (or author) submits for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewAction {
    Approve,
    ApproveWithNotes,
    ReturnForCorrection,
    Reject,
    /// Author resubmits a corrected document
    SubmitRevision,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::ApproveWithNotes => "approveWithNotes",
            Self::ReturnForCorrection => "returnForCorrection",
            Self::Reject => "reject",
            Self::SubmitRevision => "submitRevision",
        }
    }

    pub fn requires_notes(self) -> bool {
        matches!(self, Self::ApproveWithNotes | Self::ReturnForCorrection | Self::Reject)
    }

    /// How marks travel with this action by default: reviewer outcomes send
    /// the annotation list for server-side baking, revisions send a
    /// client-baked file.
    pub fn export_mode(self) -> ExportMode {
        match self {
            Self::SubmitRevision => ExportMode::BakedPdf,
            _ => ExportMode::Annotations,
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    Annotations,
    BakedPdf,
}

/// Marks attached to a submission; one or the other, never both
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionPayload {
    Annotations(Vec<Annotation>),
    BakedFile(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} requires non-empty notes")]
pub struct NotesRequired(pub ReviewAction);

/// A validated review submission
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSubmission {
    action: ReviewAction,
    notes: Option<String>,
    payload: Option<SubmissionPayload>,
}

impl ReviewSubmission {
    /// Blank notes count as absent; actions that require notes are refused
    /// without them.
    pub fn new(
        action: ReviewAction,
        notes: Option<String>,
        payload: Option<SubmissionPayload>,
    ) -> Result<Self, NotesRequired> {
        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if action.requires_notes() && notes.is_none() {
            return Err(NotesRequired(action));
        }
        Ok(Self { action, notes, payload })
    }

    /// Attach marks to an already validated submission
    pub fn with_payload(mut self, payload: Option<SubmissionPayload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn action(&self) -> ReviewAction {
        self.action
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn payload(&self) -> Option<&SubmissionPayload> {
        self.payload.as_ref()
    }
}

/// Backend acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("request rejected {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("document {0} not found")]
    NotFound(DocumentId),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::Server { .. })
    }
}

#[async_trait]
pub trait ReviewTransport: Send + Sync {
    /// Original PDF bytes of a document
    async fn source_bytes(&self, document_id: &DocumentId) -> Result<Vec<u8>, TransportError>;

    async fn submit_review(
        &self,
        document_id: &DocumentId,
        submission: &ReviewSubmission,
    ) -> Result<Ack, TransportError>;

    /// Store the annotation list remotely without submitting an outcome
    async fn save_draft(
        &self,
        document_id: &DocumentId,
        annotations: &[Annotation],
    ) -> Result<Ack, TransportError>;
}

/// A transport plus the retry policy for its idempotent calls
#[derive(Clone)]
pub struct TransportAdapter {
    inner: Arc<dyn ReviewTransport>,
    retry: RetryPolicy,
}

impl fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportAdapter").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl TransportAdapter {
    pub fn new(inner: Arc<dyn ReviewTransport>, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetch source bytes, retrying transient failures with backoff
    pub async fn load_source(
        &self,
        document_id: &DocumentId,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, RetryError<TransportError>> {
        retry(&self.retry, token, TransportError::is_transient, |attempt| {
            tracing::debug!(document = %document_id, attempt, "fetching source bytes");
            self.inner.source_bytes(document_id)
        })
        .await
    }

    pub async fn submit_review(
        &self,
        document_id: &DocumentId,
        submission: &ReviewSubmission,
    ) -> Result<Ack, TransportError> {
        self.inner.submit_review(document_id, submission).await
    }

    pub async fn save_draft(
        &self,
        document_id: &DocumentId,
        annotations: &[Annotation],
    ) -> Result<Ack, TransportError> {
        self.inner.save_draft(document_id, annotations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails `failures` times with the given error, then serves `bytes`
    struct Flaky {
        failures: u32,
        error: TransportError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReviewTransport for Flaky {
        async fn source_bytes(&self, _: &DocumentId) -> Result<Vec<u8>, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(b"%PDF".to_vec())
            }
        }

        async fn submit_review(&self, _: &DocumentId, _: &ReviewSubmission) -> Result<Ack, TransportError> {
            Err(TransportError::Timeout)
        }

        async fn save_draft(&self, _: &DocumentId, _: &[Annotation]) -> Result<Ack, TransportError> {
            Ok(Ack::default())
        }
    }

    fn adapter(failures: u32, error: TransportError) -> (TransportAdapter, Arc<Flaky>) {
        let flaky = Arc::new(Flaky { failures, error, calls: AtomicU32::new(0) });
        let policy = RetryPolicy::default().with_initial_delay(Duration::from_millis(10));
        (TransportAdapter::new(flaky.clone(), policy), flaky)
    }

    #[test]
    fn test_notes_requirements() {
        assert_eq!(
            ReviewSubmission::new(ReviewAction::ReturnForCorrection, Some("  ".into()), None),
            Err(NotesRequired(ReviewAction::ReturnForCorrection))
        );
        assert!(ReviewSubmission::new(ReviewAction::Reject, None, None).is_err());
        assert!(ReviewSubmission::new(ReviewAction::Approve, None, None).is_ok());

        let submission =
            ReviewSubmission::new(ReviewAction::ApproveWithNotes, Some(" fine \n".into()), None)
                .expect("notes present");
        assert_eq!(submission.notes(), Some("fine"));
    }

    #[test]
    fn test_action_wire_names() {
        let json = serde_json::to_string(&ReviewAction::ReturnForCorrection).expect("serialize");
        assert_eq!(json, "\"returnForCorrection\"");
        assert_eq!(ReviewAction::SubmitRevision.export_mode(), ExportMode::BakedPdf);
        assert_eq!(ReviewAction::Reject.export_mode(), ExportMode::Annotations);
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Server { status: 503, message: String::new() }.is_transient());
        assert!(!TransportError::Rejected { status: 400, message: String::new() }.is_transient());
        assert!(!TransportError::NotFound(DocumentId::new("x")).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_source_retries_transient_failures() {
        let (adapter, flaky) = adapter(2, TransportError::Connection("reset".into()));

        let bytes = adapter
            .load_source(&DocumentId::new("doc"), &CancellationToken::new())
            .await
            .expect("third attempt succeeds");

        assert_eq!(bytes, b"%PDF");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_source_does_not_retry_not_found() {
        let id = DocumentId::new("missing");
        let (adapter, flaky) = adapter(5, TransportError::NotFound(id.clone()));

        let result = adapter.load_source(&id, &CancellationToken::new()).await;

        assert!(matches!(result, Err(RetryError::Fatal(TransportError::NotFound(_)))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submissions_are_not_retried() {
        let (adapter, _) = adapter(0, TransportError::Timeout);
        let submission = ReviewSubmission::new(ReviewAction::Approve, None, None).expect("valid");

        let result = adapter.submit_review(&DocumentId::new("doc"), &submission).await;
        assert_eq!(result, Err(TransportError::Timeout));
    }
}
