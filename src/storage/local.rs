//! Local filesystem storage backend.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::catalog::Record;
use crate::storage::{StorageBackend, StorageError, decode_collection, encode_collection};

/// Storage backend keeping the catalog in a single local JSON file.
pub struct LocalStorageBackend {
    path: PathBuf,
}

impl LocalStorageBackend {
    /// Create a backend for the document at `path` (e.g., `data/services.json`).
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for LocalStorageBackend {
    fn read(&self) -> Result<Vec<Record>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "document not found, returning empty catalog");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(StorageError::Read(format!("{}: {e}", self.path.display())));
            }
        };

        decode_collection(&bytes, &self.path.display().to_string())
    }

    fn write(&self, records: &[Record]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::Write(format!("create dir {}: {e}", parent.display()))
            })?;
        }

        let contents = encode_collection(records)?;

        fs::write(&self.path, contents)
            .map_err(|e| StorageError::Write(format!("{}: {e}", self.path.display())))?;

        debug!(count = records.len(), path = %self.path.display(), "wrote catalog document");
        Ok(())
    }

    fn backend_tag(&self) -> &'static str {
        "local"
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
