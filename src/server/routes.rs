//! Route handlers. Each one runs its store call on the blocking pool.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::catalog::{Record, RecordPatch};
use crate::server::AppState;
use crate::server::error::ApiError;
use crate::store::{CatalogError, CatalogStore};

/// Query parameters for `GET /services`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub category: Option<String>,
    pub search: Option<String>,
}

/// Response body for `GET /services`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceList {
    pub services: Vec<Record>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoryList {
    pub categories: Vec<String>,
}

async fn with_store<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CatalogStore) -> Result<T, CatalogError> + Send + 'static,
{
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?;
    Ok(result?)
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "Service Catalog API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn list_services(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ServiceList>, ApiError> {
    let services = with_store(&state, move |store| {
        store.list(params.category.as_deref(), params.search.as_deref())
    })
    .await?;

    Ok(Json(ServiceList {
        total: services.len(),
        services,
    }))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let record = with_store(&state, move |store| store.get(&name)).await?;
    Ok(Json(record))
}

pub async fn create_service(
    State(state): State<AppState>,
    body: Result<Json<Record>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(record) = body?;
    let record = record.normalized();
    record.validate()?;

    let created = with_store(&state, move |store| store.create(record)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<RecordPatch>, JsonRejection>,
) -> Result<Json<Record>, ApiError> {
    let Json(patch) = body?;
    let patch = patch.normalized();
    patch.validate()?;

    let updated = with_store(&state, move |store| store.update(&name, patch)).await?;
    Ok(Json(updated))
}

pub async fn delete_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    with_store(&state, move |store| store.delete(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<CategoryList>, ApiError> {
    let categories = with_store(&state, CatalogStore::categories).await?;
    Ok(Json(CategoryList { categories }))
}
