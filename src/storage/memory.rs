//! In-memory storage backend.
//!
//! Holds the encoded document bytes rather than the records, so reads and
//! writes go through the same codec as the persistent backends. Useful for
//! tests and for embedding the catalog without touching disk.

use std::sync::{Arc, RwLock};

use crate::catalog::Record;
use crate::storage::{StorageBackend, StorageError, decode_collection, encode_collection};

/// Thread-safe in-memory backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    document: Arc<RwLock<Option<Vec<u8>>>>,
    failing: bool,
}

impl MemoryBackend {
    /// Create a backend whose document does not exist yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-seeded with `records`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialize` if encoding fails.
    pub fn with_records(records: &[Record]) -> Result<Self, StorageError> {
        Ok(Self::with_document(encode_collection(records)?))
    }

    /// Create a backend holding arbitrary raw document bytes.
    #[must_use]
    pub fn with_document(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            document: Arc::new(RwLock::new(Some(bytes.into()))),
            failing: false,
        }
    }

    /// Create a backend where every read and write fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            document: Arc::default(),
            failing: true,
        }
    }

    /// Raw bytes of the current document, if one has been written.
    #[must_use]
    pub fn document(&self) -> Option<Vec<u8>> {
        self.document.read().ok().and_then(|doc| doc.clone())
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self) -> Result<Vec<Record>, StorageError> {
        if self.failing {
            return Err(StorageError::Read("memory: simulated failure".to_string()));
        }

        let document = self
            .document
            .read()
            .map_err(|_| StorageError::Read("memory: lock poisoned".to_string()))?;

        match document.as_deref() {
            Some(bytes) => decode_collection(bytes, "memory"),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, records: &[Record]) -> Result<(), StorageError> {
        if self.failing {
            return Err(StorageError::Write("memory: simulated failure".to_string()));
        }

        let bytes = encode_collection(records)?;
        let mut document = self
            .document
            .write()
            .map_err(|_| StorageError::Write("memory: lock poisoned".to_string()))?;
        *document = Some(bytes);
        Ok(())
    }

    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
