//! Catalog record types.
//!
//! A [`Record`] is one catalog entry. Its `name` is the natural key and is
//! serialized under the `service` key so existing `services.json` documents
//! keep loading.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key under which the wrapped document stores its record array.
pub const SERVICES_KEY: &str = "services";

/// Errors raised by boundary-level record validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Service name cannot be empty")]
    EmptyName,
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique name of the service (e.g., "Azure Virtual Machines").
    #[serde(rename = "service")]
    pub name: String,
    /// Free-text grouping label (e.g., "Compute", "Databases").
    pub category: String,
    /// Free-text detail.
    pub description: String,
}

impl Record {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            description: description.into(),
        }
    }

    /// Check the record is acceptable for creation through a boundary adapter.
    ///
    /// The store itself never calls this; it only enforces uniqueness.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyName` if the name is blank after trimming.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        Ok(())
    }

    /// Strip surrounding whitespace from the name.
    ///
    /// Both adapters call this before validation so `" VM"` and `"VM"` name
    /// the same record.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let trimmed = self.name.trim();
        if trimmed.len() != self.name.len() {
            self.name = trimmed.to_string();
        }
        self
    }

    /// Apply the present fields of `patch` onto this record.
    pub fn apply(&mut self, patch: RecordPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
    }
}

/// Sparse update for a [`Record`].
///
/// `None` leaves the field unchanged; `Some(String::new())` sets it to empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(rename = "service", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RecordPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.category.is_none() && self.description.is_none()
    }

    /// Strip surrounding whitespace from the new name, if any.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if let Some(name) = self.name.as_mut() {
            let trimmed = name.trim();
            if trimmed.len() != name.len() {
                *name = trimmed.to_string();
            }
        }
        self
    }

    /// Reject a patch that would rename a record to a blank name.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyName` if `name` is present but blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.name {
            Some(name) if name.trim().is_empty() => Err(ValidationError::EmptyName),
            _ => Ok(()),
        }
    }
}
