//! On-disk draft storage
//!
//! One JSON envelope per document under a root directory. File names are
//! the SHA-256 of the document id so arbitrary ids map to safe names.

use directories::ProjectDirs;
use redline_core::config::DraftSettings;
use redline_core::{Annotation, DocumentId, Draft, DraftError, DraftStore};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Draft(#[from] DraftError),
}

impl From<StorageError> for DraftError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Io(error) => DraftError::Io(error),
            StorageError::Draft(error) => error,
            other => DraftError::Storage(Box::new(other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileDraftStore {
    root: PathBuf,
}

impl FileDraftStore {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "Redline", "Redline").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().join("drafts") })
    }

    /// Use the configured directory, falling back to the platform data dir
    pub fn from_settings(settings: &DraftSettings) -> Result<Self, StorageError> {
        match &settings.directory {
            Some(directory) => Ok(Self::with_root(directory)),
            None => Self::from_default_project(),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn draft_path(&self, document_id: &DocumentId) -> PathBuf {
        let digest = Sha256::digest(document_id.as_str().as_bytes());
        self.root.join(format!("{}.json", hex::encode(digest)))
    }

    fn read(&self, document_id: &DocumentId) -> Result<Option<Draft>, StorageError> {
        let bytes = match fs::read(self.draft_path(document_id)) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(Draft::from_json(&bytes, document_id)?))
    }

    fn write(&self, document_id: &DocumentId, annotations: &[Annotation]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        let bytes = Draft::new(document_id.clone(), annotations.to_vec()).to_json()?;

        // Write beside the target, then rename over it.
        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(self.draft_path(document_id)).map_err(|e| e.error)?;

        tracing::debug!(document = %document_id, count = annotations.len(), "draft written");
        Ok(())
    }

    fn remove(&self, document_id: &DocumentId) -> Result<(), StorageError> {
        match fs::remove_file(self.draft_path(document_id)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

impl DraftStore for FileDraftStore {
    fn load(&self, document_id: &DocumentId) -> Result<Option<Draft>, DraftError> {
        Ok(self.read(document_id)?)
    }

    fn save(&self, document_id: &DocumentId, annotations: &[Annotation]) -> Result<(), DraftError> {
        Ok(self.write(document_id, annotations)?)
    }

    fn clear(&self, document_id: &DocumentId) -> Result<(), DraftError> {
        Ok(self.remove(document_id)?)
    }
}
