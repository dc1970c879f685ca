//! Document viewer lifecycle
//!
//! `Viewer` holds at most one open session. Opening a document tears the
//! previous one down first; loading retries transient transport failures
//! and parks in `Failed` (with a manual retry) when the budget runs out.
//! Submissions are exclusive: while one is in flight the busy flag is set
//! and further submissions are refused.

use crate::annotation::DocumentId;
use crate::bake::BakeError;
use crate::config::EngineConfig;
use crate::draft::{DraftError, DraftStore};
use crate::session::{Session, SessionError};
use crate::transport::{
    Ack, ExportMode, NotesRequired, ReviewAction, ReviewSubmission, ReviewTransport,
    SubmissionPayload, TransportAdapter, TransportError,
};
use redline_scheduler::{CancellationRegistry, RetryError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Session-scoped operations that can be cancelled by a close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operation {
    Load,
    Submit,
    SaveDraft,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("document {document} unavailable after {attempts} attempts: {last}")]
    Unavailable { document: DocumentId, attempts: u32, last: TransportError },
    #[error("document {document} could not be fetched: {error}")]
    Fetch { document: DocumentId, error: TransportError },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("load abandoned")]
    Cancelled,
    #[error("no failed load to retry")]
    NothingToRetry,
}

impl LoadError {
    fn from_retry(document: &DocumentId, error: RetryError<TransportError>) -> Self {
        match error {
            RetryError::Exhausted { attempts, last } => {
                Self::Unavailable { document: document.clone(), attempts, last }
            }
            RetryError::Fatal(error) => Self::Fetch { document: document.clone(), error },
            RetryError::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("another submission is in flight")]
    Busy,
    #[error("no document is open")]
    NoSession,
    #[error(transparent)]
    NotesRequired(#[from] NotesRequired),
    #[error("bake failed: {0}")]
    Bake(#[from] BakeError),
    #[error("submission failed: {0}")]
    Transport(#[from] TransportError),
    #[error("review accepted but the local draft could not be cleared: {0}")]
    Draft(#[from] DraftError),
    #[error("submission abandoned")]
    Cancelled,
}

#[derive(Debug, Default)]
pub enum ViewerState {
    #[default]
    Closed,
    Loading(DocumentId),
    /// Loading gave up; `retry` tries again
    Failed { document_id: DocumentId, message: String },
    Interactive(Box<Session>),
}

/// Read-only view of the submission lock, for the host's UI
#[derive(Debug, Clone)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.0)))
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cancels whatever the viewer is doing; usable while an operation holds
/// the viewer borrowed
#[derive(Debug, Clone)]
pub struct CloseHandle {
    operations: Arc<CancellationRegistry<Operation>>,
}

impl CloseHandle {
    /// Abandon in-flight loads and submissions. Returns how many were cancelled.
    pub fn close(&self) -> usize {
        self.operations.cancel_all()
    }
}

pub struct Viewer {
    state: ViewerState,
    transport: TransportAdapter,
    draft_store: Arc<dyn DraftStore>,
    config: EngineConfig,
    operations: Arc<CancellationRegistry<Operation>>,
    busy: BusyFlag,
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("state", &self.state)
            .field("busy", &self.busy.is_busy())
            .finish_non_exhaustive()
    }
}

impl Viewer {
    pub fn new(
        transport: Arc<dyn ReviewTransport>,
        draft_store: Arc<dyn DraftStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            state: ViewerState::Closed,
            transport: TransportAdapter::new(transport, config.retry.policy()),
            draft_store,
            config,
            operations: Arc::new(CancellationRegistry::new()),
            busy: BusyFlag(Arc::new(AtomicBool::new(false))),
        }
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            ViewerState::Interactive(session) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        match &mut self.state {
            ViewerState::Interactive(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle { operations: Arc::clone(&self.operations) }
    }

    /// Open `document_id`, closing whatever was open before.
    ///
    /// Transient fetch failures are retried per the configured policy. On
    /// failure the viewer is left in `Failed`; a close during the load
    /// leaves it `Closed` and drops the fetched bytes.
    pub async fn open(&mut self, document_id: DocumentId) -> Result<(), LoadError> {
        if let Err(error) = self.close() {
            tracing::warn!(%error, "previous session closed without flushing its draft");
        }

        let token = self.operations.register(Operation::Load);
        self.state = ViewerState::Loading(document_id.clone());
        tracing::info!(document = %document_id, "loading document");

        let fetched = self.transport.load_source(&document_id, &token).await;
        if token.is_cancelled() {
            tracing::debug!(document = %document_id, "load result dropped after close");
            self.state = ViewerState::Closed;
            return Err(LoadError::Cancelled);
        }
        self.operations.unregister(&Operation::Load);

        let opened = fetched
            .map_err(|error| LoadError::from_retry(&document_id, error))
            .and_then(|bytes| {
                Session::open(document_id.clone(), bytes, Arc::clone(&self.draft_store), self.config.clone())
                    .map_err(LoadError::from)
            });

        match opened {
            Ok(session) => {
                self.state = ViewerState::Interactive(Box::new(session));
                Ok(())
            }
            Err(error) => {
                tracing::warn!(document = %document_id, %error, "document failed to load");
                self.state = ViewerState::Failed { document_id, message: error.to_string() };
                Err(error)
            }
        }
    }

    /// Retry a failed load
    pub async fn retry(&mut self) -> Result<(), LoadError> {
        let ViewerState::Failed { document_id, .. } = &self.state else {
            return Err(LoadError::NothingToRetry);
        };
        let document_id = document_id.clone();
        self.open(document_id).await
    }

    /// Submit a review outcome with the action's default export mode
    pub async fn submit(&mut self, action: ReviewAction, notes: Option<String>) -> Result<Ack, SubmitError> {
        self.submit_with(action, notes, action.export_mode()).await
    }

    /// Submit a review outcome.
    ///
    /// Notes are validated before anything else happens. Marks travel as
    /// the annotation list or as a baked PDF per `mode`; with no marks
    /// there is no payload. The session's marks and draft are cleared only
    /// once the backend acknowledges.
    pub async fn submit_with(
        &mut self,
        action: ReviewAction,
        notes: Option<String>,
        mode: ExportMode,
    ) -> Result<Ack, SubmitError> {
        let _guard = self.busy.acquire().ok_or(SubmitError::Busy)?;
        let ViewerState::Interactive(session) = &mut self.state else {
            return Err(SubmitError::NoSession);
        };
        let submission = ReviewSubmission::new(action, notes, None)?;
        let token = self.operations.register(Operation::Submit);

        let payload = if session.store().is_empty() {
            None
        } else {
            match mode {
                ExportMode::Annotations => {
                    Some(SubmissionPayload::Annotations(session.store().all().to_vec()))
                }
                ExportMode::BakedPdf => {
                    let outcome = match session.bake(&token) {
                        Ok(outcome) => outcome,
                        Err(error) => {
                            self.operations.unregister(&Operation::Submit);
                            return Err(error.into());
                        }
                    };
                    if !outcome.is_complete() {
                        tracing::warn!(skipped = outcome.skipped.len(), "baked with skipped marks");
                    }
                    Some(SubmissionPayload::BakedFile(outcome.bytes))
                }
            }
        };
        let submission = submission.with_payload(payload);
        let document_id = session.document_id().clone();

        let result = self.transport.submit_review(&document_id, &submission).await;
        if token.is_cancelled() {
            tracing::debug!(document = %document_id, "submission result dropped after close");
            return Err(SubmitError::Cancelled);
        }
        self.operations.unregister(&Operation::Submit);

        let ack = match result {
            Ok(ack) => ack,
            Err(error) => {
                tracing::warn!(document = %document_id, %action, %error, "submission failed");
                return Err(error.into());
            }
        };
        tracing::info!(document = %document_id, %action, "submission acknowledged");
        if let ViewerState::Interactive(session) = &mut self.state {
            session.clear_after_submit()?;
        }
        Ok(ack)
    }

    /// Push the current annotation list to the backend as a draft
    pub async fn save_draft_remote(&mut self) -> Result<Ack, SubmitError> {
        let ViewerState::Interactive(session) = &self.state else {
            return Err(SubmitError::NoSession);
        };
        let token = self.operations.register(Operation::SaveDraft);
        let document_id = session.document_id().clone();
        let annotations = session.store().all().to_vec();

        let result = self.transport.save_draft(&document_id, &annotations).await;
        if token.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }
        self.operations.unregister(&Operation::SaveDraft);
        Ok(result?)
    }

    /// Tear down the open session, flushing its pending draft
    pub fn close(&mut self) -> Result<(), DraftError> {
        self.operations.cancel_all();
        match std::mem::take(&mut self.state) {
            ViewerState::Interactive(session) => session.close(),
            _ => Ok(()),
        }
    }
}
