//! Command implementations for the CLI.
//!
//! Each command takes an explicitly constructed [`CatalogStore`]; the binary
//! builds it once from [`Config`] via [`open_store`].

use anyhow::Context;

use crate::catalog::{Record, RecordPatch};
use crate::config::Config;
use crate::storage::open_backend;
use crate::store::CatalogStore;

/// Build the catalog store for the configured backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be constructed.
pub fn open_store(config: &Config) -> anyhow::Result<CatalogStore> {
    let backend = open_backend(&config.storage).context("Cannot open storage backend")?;
    Ok(CatalogStore::new(backend))
}

/// List services matching the optional filters.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub fn list(
    store: &CatalogStore,
    category: Option<&str>,
    search: Option<&str>,
) -> anyhow::Result<Vec<Record>> {
    Ok(store.list(category, search)?)
}

/// Get a service by exact name.
///
/// # Errors
///
/// Returns an error if the service does not exist or the catalog cannot be
/// read.
pub fn get(store: &CatalogStore, name: &str) -> anyhow::Result<Record> {
    Ok(store.get(name)?)
}

/// Add a new service.
///
/// # Errors
///
/// Returns an error if the name is blank, already taken, or the catalog
/// cannot be written.
pub fn add(
    store: &CatalogStore,
    name: &str,
    category: &str,
    description: &str,
) -> anyhow::Result<Record> {
    let record = Record::new(name, category, description).normalized();
    record.validate()?;
    Ok(store.create(record)?)
}

/// Apply a partial update to an existing service.
///
/// # Errors
///
/// Returns an error if the new name is blank or taken, the service does not
/// exist, or the catalog cannot be written.
pub fn update(store: &CatalogStore, name: &str, patch: RecordPatch) -> anyhow::Result<Record> {
    let patch = patch.normalized();
    patch.validate()?;
    if patch.is_empty() {
        tracing::debug!(name, "update with no fields; rewriting record unchanged");
    }
    Ok(store.update(name, patch)?)
}

/// Delete a service by exact name.
///
/// # Errors
///
/// Returns an error if the service does not exist or the catalog cannot be
/// written.
pub fn delete(store: &CatalogStore, name: &str) -> anyhow::Result<()> {
    Ok(store.delete(name)?)
}

/// Distinct categories in first-seen order.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub fn categories(store: &CatalogStore) -> anyhow::Result<Vec<String>> {
    Ok(store.categories()?)
}

/// Render services as an aligned name/category/description table.
#[must_use]
pub fn render_table(records: &[Record]) -> String {
    let name_width = records
        .iter()
        .map(|r| r.name.chars().count())
        .chain(std::iter::once("SERVICE".len()))
        .max()
        .unwrap_or_default();
    let category_width = records
        .iter()
        .map(|r| r.category.chars().count())
        .chain(std::iter::once("CATEGORY".len()))
        .max()
        .unwrap_or_default();

    let mut lines = Vec::with_capacity(records.len() + 2);
    lines.push(format!(
        "{:<name_width$}  {:<category_width$}  DESCRIPTION",
        "SERVICE", "CATEGORY"
    ));
    lines.extend(records.iter().map(|record| {
        format!(
            "{:<name_width$}  {:<category_width$}  {}",
            record.name, record.category, record.description
        )
    }));
    lines.push(format!("{} service(s)", records.len()));
    lines.join("\n")
}

/// Render one service as labelled lines.
#[must_use]
pub fn render_record(record: &Record) -> String {
    format!(
        "Service:     {}\nCategory:    {}\nDescription: {}",
        record.name, record.category, record.description
    )
}
