//! User-facing error taxonomy.
//!
//! Every failure a request can end in maps to exactly one variant, and each
//! variant to one status code. Dependency failures are logged with their cause
//! and answered with a generic message so no storage or provider detail leaks.

use crate::store::StoreError;
use crate::translation::ProviderError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed fields, unsupported language code
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Credential past its expiration
    #[error("{0}")]
    Expired(String),

    /// Unknown phrase identity, language or user
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Translation provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("Upstream service failure: {0:#}")]
    Upstream(anyhow::Error),

    #[error("Storage failure: {0}")]
    Storage(StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Expired(_) => StatusCode::NOT_ACCEPTABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Provider(_) | AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            AppError::Provider(_) | AppError::Upstream(_) | AppError::Storage(_)
        )
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::DuplicateKey(what) => AppError::Conflict(what),
            other => AppError::Storage(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.is_dependency_failure() {
            error!("Request failed: {}", self);
            "Server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
