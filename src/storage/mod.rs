//! Storage backend trait and implementations.
//!
//! Every backend stores the whole catalog as one JSON document and replaces
//! it wholesale on write. The document codec lives here so the local file,
//! blob and in-memory backends read and produce byte-identical documents.

#[cfg(feature = "azure")]
pub mod blob;
pub mod local;
pub mod memory;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;
use tracing::info;

use crate::catalog::{Record, SERVICES_KEY};
use crate::config::{StorageConfig, StorageKind, expand_tilde};

#[cfg(feature = "azure")]
use crate::storage::blob::BlobStorageBackend;
use crate::storage::local::LocalStorageBackend;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read: {0}")]
    Read(String),

    #[error("Failed to write: {0}")]
    Write(String),

    #[error("Invalid JSON document: {0}")]
    InvalidDocument(String),

    #[error("Unexpected JSON structure: {0}")]
    UnexpectedStructure(String),

    #[error("Failed to serialize: {0}")]
    Serialize(String),

    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// Trait for whole-document storage backends (local file, blob store, memory).
pub trait StorageBackend: Send + Sync {
    /// Read the full record collection.
    ///
    /// A missing document is an empty collection, not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document cannot be read or decoded.
    fn read(&self) -> Result<Vec<Record>, StorageError>;

    /// Replace the stored document with `records`, in the wrapped shape.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document cannot be written.
    fn write(&self, records: &[Record]) -> Result<(), StorageError>;

    /// Short identifier for logs (e.g., "local", "azure_blob").
    fn backend_tag(&self) -> &'static str;

    /// Human-readable location of the document, for logs only.
    fn location(&self) -> String;
}

#[derive(Serialize)]
struct WrappedDocument<'a> {
    services: &'a [Record],
}

/// Decode a stored document.
///
/// Accepts both the wrapped `{"services": [...]}` shape and a bare array.
///
/// # Errors
///
/// Returns `StorageError::InvalidDocument` if the bytes are not valid JSON or
/// an entry is malformed, and `StorageError::UnexpectedStructure` if the JSON
/// is neither accepted shape. `origin` prefixes the message.
pub fn decode_collection(bytes: &[u8], origin: &str) -> Result<Vec<Record>, StorageError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::InvalidDocument(format!("{origin}: {e}")))?;

    let entries = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove(SERVICES_KEY) {
            Some(services @ Value::Array(_)) => services,
            _ => return Err(StorageError::UnexpectedStructure(origin.to_string())),
        },
        _ => return Err(StorageError::UnexpectedStructure(origin.to_string())),
    };

    serde_json::from_value(entries)
        .map_err(|e| StorageError::InvalidDocument(format!("{origin}: {e}")))
}

/// Encode records as a wrapped, 4-space indented JSON document.
///
/// # Errors
///
/// Returns `StorageError::Serialize` if serialization fails.
pub fn encode_collection(records: &[Record]) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));

    WrappedDocument { services: records }
        .serialize(&mut serializer)
        .map_err(|e| StorageError::Serialize(e.to_string()))?;

    Ok(buf)
}

/// Construct the backend selected by `config`.
///
/// Called once at startup; the returned handle is shared by every operation.
///
/// # Errors
///
/// Returns `StorageError::Config` if the selected backend is missing required
/// settings or was compiled out.
pub fn open_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config.kind {
        StorageKind::Local => {
            let path = expand_tilde(&config.local_path);
            info!(path = %path.display(), "using local file storage");
            Ok(Arc::new(LocalStorageBackend::new(path)))
        }
        #[cfg(feature = "azure")]
        StorageKind::Azure => {
            info!(
                container = %config.azure.container_name,
                blob = %config.azure.blob_name,
                "using azure blob storage"
            );
            Ok(Arc::new(BlobStorageBackend::from_config(&config.azure)?))
        }
        #[cfg(not(feature = "azure"))]
        StorageKind::Azure => Err(StorageError::Config(
            "azure storage requested but built without the `azure` feature".to_string(),
        )),
    }
}
