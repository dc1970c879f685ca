//! Local drafts
//!
//! A draft is the durable copy of a document's uncommitted annotations,
//! keyed by document id. It is read once when a session opens, rewritten
//! (debounced) after committed mutations, and cleared when a review is
//! acknowledged or the reviewer clears everything.

use crate::annotation::{Annotation, DocumentId};
use crate::config::DraftSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Schema version written into every draft envelope
pub const DRAFT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("draft I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("draft serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("draft schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("draft belongs to {found}, expected {expected}")]
    DocumentMismatch { expected: DocumentId, found: DocumentId },
    #[error("draft storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Persisted draft envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub version: u32,
    pub document_id: DocumentId,
    pub saved_at: DateTime<Utc>,
    pub annotations: Vec<Annotation>,
}

impl Draft {
    pub fn new(document_id: DocumentId, annotations: Vec<Annotation>) -> Self {
        Self { version: DRAFT_SCHEMA_VERSION, document_id, saved_at: Utc::now(), annotations }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, DraftError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode an envelope and check it belongs to `expected`
    pub fn from_json(bytes: &[u8], expected: &DocumentId) -> Result<Self, DraftError> {
        let draft: Self = serde_json::from_slice(bytes)?;
        if draft.version > DRAFT_SCHEMA_VERSION {
            return Err(DraftError::UnsupportedVersion {
                found: draft.version,
                supported: DRAFT_SCHEMA_VERSION,
            });
        }
        if &draft.document_id != expected {
            return Err(DraftError::DocumentMismatch {
                expected: expected.clone(),
                found: draft.document_id,
            });
        }
        Ok(draft)
    }
}

/// Durable draft storage keyed by document id
pub trait DraftStore: Send + Sync {
    fn load(&self, document_id: &DocumentId) -> Result<Option<Draft>, DraftError>;
    fn save(&self, document_id: &DocumentId, annotations: &[Annotation]) -> Result<(), DraftError>;
    fn clear(&self, document_id: &DocumentId) -> Result<(), DraftError>;
}

/// In-process draft store holding encoded envelopes
#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    drafts: Mutex<HashMap<DocumentId, Vec<u8>>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentId, Vec<u8>>> {
        self.drafts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Encoded envelope as last written
    pub fn raw(&self, document_id: &DocumentId) -> Option<Vec<u8>> {
        self.lock().get(document_id).cloned()
    }

    pub fn contains(&self, document_id: &DocumentId) -> bool {
        self.lock().contains_key(document_id)
    }
}

impl DraftStore for MemoryDraftStore {
    fn load(&self, document_id: &DocumentId) -> Result<Option<Draft>, DraftError> {
        match self.lock().get(document_id) {
            Some(bytes) => Draft::from_json(bytes, document_id).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, document_id: &DocumentId, annotations: &[Annotation]) -> Result<(), DraftError> {
        let bytes = Draft::new(document_id.clone(), annotations.to_vec()).to_json()?;
        self.lock().insert(document_id.clone(), bytes);
        Ok(())
    }

    fn clear(&self, document_id: &DocumentId) -> Result<(), DraftError> {
        self.lock().remove(document_id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    first_marked_at: Instant,
    last_marked_at: Instant,
}

/// Debounces draft writes.
///
/// Driven by the caller's clock: `mark_dirty` on each committed mutation,
/// `poll` from the host's tick, `flush` on close. A write happens once the
/// quiet period has elapsed since the last change, or the maximum delay has
/// elapsed since the first unsaved change.
#[derive(Debug)]
pub struct DraftWriter {
    debounce: Duration,
    max_debounce: Duration,
    pending: Option<PendingWrite>,
}

impl DraftWriter {
    pub fn new(settings: &DraftSettings) -> Self {
        Self { debounce: settings.debounce(), max_debounce: settings.max_debounce(), pending: None }
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        let first_marked_at = self.pending.map_or(now, |p| p.first_marked_at);
        self.pending = Some(PendingWrite { first_marked_at, last_marked_at: now });
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.pending.is_some_and(|p| {
            now.saturating_duration_since(p.last_marked_at) >= self.debounce
                || now.saturating_duration_since(p.first_marked_at) >= self.max_debounce
        })
    }

    /// Write the draft if it is due. Returns whether a write happened.
    pub fn poll(
        &mut self,
        now: Instant,
        store: &dyn DraftStore,
        document_id: &DocumentId,
        annotations: &[Annotation],
    ) -> Result<bool, DraftError> {
        if !self.is_due(now) {
            return Ok(false);
        }
        self.flush(store, document_id, annotations)
    }

    /// Write immediately if dirty. A failed write stays pending.
    pub fn flush(
        &mut self,
        store: &dyn DraftStore,
        document_id: &DocumentId,
        annotations: &[Annotation],
    ) -> Result<bool, DraftError> {
        if self.pending.is_none() {
            return Ok(false);
        }
        match store.save(document_id, annotations) {
            Ok(()) => {
                tracing::debug!(document = %document_id, count = annotations.len(), "draft saved");
                self.pending = None;
                Ok(true)
            }
            Err(error) => {
                tracing::warn!(document = %document_id, %error, "draft save failed");
                Err(error)
            }
        }
    }

    /// Forget pending changes without writing
    pub fn discard(&mut self) {
        self.pending = None;
    }
}
