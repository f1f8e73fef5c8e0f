//! API error type rendered as `{"detail": "..."}` for the dashboards.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use ward_core::{ErrorClass, classify};

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Upstream storage still failing after retries.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        if matches!(
            e,
            StorageError::Decode(_) | StorageError::EmptyRepresentation { .. }
        ) {
            return Self::Internal(format!("unexpected storage response: {e}"));
        }
        match classify(&e) {
            ErrorClass::Terminal if e.status() == Some(404) => Self::NotFound(e.to_string()),
            ErrorClass::Terminal => Self::BadRequest(e.to_string()),
            ErrorClass::Retryable | ErrorClass::Unknown => {
                Self::Unavailable("storage is temporarily unavailable".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
