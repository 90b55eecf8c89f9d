//! The catalog store: list, get, create, update and delete over a
//! whole-document storage backend.
//!
//! The store keeps no state between calls. Every operation reads the full
//! collection, applies its logic, and (for mutations) writes the full
//! collection back. There is no locking, so two concurrent read-modify-write
//! cycles resolve last-writer-wins.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::catalog::{Record, RecordPatch};
use crate::storage::{StorageBackend, StorageError};

/// Errors returned by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Service already exists: {0}")]
    DuplicateName(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CatalogError {
    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::DuplicateName(_) => "duplicate_name",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// Catalog operations on top of an injected storage backend.
#[derive(Clone)]
pub struct CatalogStore {
    backend: Arc<dyn StorageBackend>,
}

impl CatalogStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    fn load(&self) -> Result<Vec<Record>, CatalogError> {
        self.backend.read().map_err(|e| {
            error!(location = %self.backend.location(), error = %e, "catalog read failed");
            CatalogError::Storage(e)
        })
    }

    fn save(&self, records: &[Record]) -> Result<(), CatalogError> {
        self.backend.write(records).map_err(|e| {
            error!(location = %self.backend.location(), error = %e, "catalog write failed");
            CatalogError::Storage(e)
        })
    }

    /// List records, optionally filtered.
    ///
    /// `category` must equal the record's category ignoring case; `search`
    /// must occur, ignoring case, in the name or the description. Both
    /// filters must hold when both are given. Empty filters are ignored.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if the document cannot be read.
    pub fn list(
        &self,
        category: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<Record>, CatalogError> {
        let category = category.filter(|c| !c.is_empty());
        let search = search.filter(|s| !s.is_empty());

        let span = info_span!(
            "catalog",
            op = "list",
            backend = self.backend.backend_tag(),
            category = category.unwrap_or_default(),
            search = search.unwrap_or_default(),
        );
        let _guard = span.enter();

        let category = category.map(str::to_lowercase);
        let search = search.map(str::to_lowercase);

        let records: Vec<Record> = self
            .load()?
            .into_iter()
            .filter(|record| matches_filters(record, category.as_deref(), search.as_deref()))
            .collect();

        info!(count = records.len(), "listed services");
        Ok(records)
    }

    /// Fetch the first record whose name matches exactly (case-sensitive).
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if no record has that name.
    pub fn get(&self, name: &str) -> Result<Record, CatalogError> {
        let span = info_span!("catalog", op = "get", backend = self.backend.backend_tag(), name);
        let _guard = span.enter();

        self.load()?
            .into_iter()
            .find(|record| record.name == name)
            .ok_or_else(|| {
                warn!("service not found");
                CatalogError::NotFound(name.to_string())
            })
    }

    /// Append a new record.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateName` if a record with the same name
    /// exists; nothing is written in that case.
    pub fn create(&self, record: Record) -> Result<Record, CatalogError> {
        let span = info_span!(
            "catalog",
            op = "create",
            backend = self.backend.backend_tag(),
            name = %record.name,
        );
        let _guard = span.enter();

        let mut records = self.load()?;

        if records.iter().any(|existing| existing.name == record.name) {
            warn!("duplicate service name");
            return Err(CatalogError::DuplicateName(record.name));
        }

        records.push(record.clone());
        self.save(&records)?;

        info!("created service");
        Ok(record)
    }

    /// Apply `patch` to the record named `name`, in place.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if no record has that name, or
    /// `CatalogError::DuplicateName` if the patch renames it to a name
    /// another record already uses. Nothing is written on either error.
    pub fn update(&self, name: &str, patch: RecordPatch) -> Result<Record, CatalogError> {
        let span = info_span!(
            "catalog",
            op = "update",
            backend = self.backend.backend_tag(),
            name,
            new_name = patch.name.as_deref().unwrap_or_default(),
        );
        let _guard = span.enter();

        let mut records = self.load()?;

        let Some(index) = records.iter().position(|record| record.name == name) else {
            warn!("service not found");
            return Err(CatalogError::NotFound(name.to_string()));
        };

        if let Some(new_name) = patch.name.as_deref()
            && new_name != name
            && records.iter().any(|record| record.name == new_name)
        {
            warn!("rename collides with existing service");
            return Err(CatalogError::DuplicateName(new_name.to_string()));
        }

        records[index].apply(patch);
        self.save(&records)?;

        info!("updated service");
        Ok(records.swap_remove(index))
    }

    /// Remove every record named `name`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if nothing was removed; nothing is
    /// written in that case.
    pub fn delete(&self, name: &str) -> Result<(), CatalogError> {
        let span = info_span!("catalog", op = "delete", backend = self.backend.backend_tag(), name);
        let _guard = span.enter();

        let mut records = self.load()?;
        let before = records.len();
        records.retain(|record| record.name != name);

        if records.len() == before {
            warn!("service not found");
            return Err(CatalogError::NotFound(name.to_string()));
        }

        self.save(&records)?;

        info!(removed = before - records.len(), "deleted service");
        Ok(())
    }

    /// Distinct categories in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if the document cannot be read.
    pub fn categories(&self) -> Result<Vec<String>, CatalogError> {
        let span = info_span!("catalog", op = "categories", backend = self.backend.backend_tag());
        let _guard = span.enter();

        let mut categories: Vec<String> = Vec::new();
        for record in self.load()? {
            if !categories.contains(&record.category) {
                categories.push(record.category);
            }
        }
        Ok(categories)
    }
}

/// Filters are expected already lowercased.
fn matches_filters(record: &Record, category: Option<&str>, search: Option<&str>) -> bool {
    if let Some(category) = category
        && record.category.to_lowercase() != category
    {
        return false;
    }

    if let Some(search) = search {
        return record.name.to_lowercase().contains(search)
            || record.description.to_lowercase().contains(search);
    }

    true
}
