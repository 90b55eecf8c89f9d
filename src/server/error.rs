//! HTTP error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::catalog::ValidationError;
use crate::store::CatalogError;

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub error_code: String,
}

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Catalog(CatalogError),
    Validation(String),
    Internal(String),
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, code) = match self {
            Self::Catalog(err @ CatalogError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, err.to_string(), err.code())
            }
            Self::Catalog(err @ CatalogError::DuplicateName(_)) => {
                (StatusCode::CONFLICT, err.to_string(), err.code())
            }
            Self::Catalog(err @ CatalogError::Storage(_)) => {
                error!(error = %err, "storage failure while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage backend unavailable".to_string(),
                    err.code(),
                )
            }
            Self::Validation(detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, detail, "validation_error")
            }
            Self::Internal(detail) => {
                error!(error = %detail, "internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "internal_error",
                )
            }
        };

        let body = ErrorBody {
            detail,
            error_code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
