use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::initiator::InitiateError;
use crate::services::result_store::StoreError;
use crate::services::storage::StorageError;

/// Error returned by route handlers. Every variant becomes a
/// `{"message": ...}` body; internal details stay in the logs.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Missing or invalid webhook secret")]
    Unauthorized,

    #[error("Result not found")]
    NotFound,

    #[error("Unsupported media type")]
    UnsupportedMediaType,

    #[error("Failed to start diagnosis: {0}")]
    DispatchFailed(String),

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<InitiateError> for ApiError {
    fn from(err: InitiateError) -> Self {
        match err {
            InitiateError::Dispatch(e) => ApiError::DispatchFailed(e.to_string()),
            InitiateError::Store(e) => ApiError::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::UnsupportedMediaType => (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string()),
            ApiError::DispatchFailed(_) => (
                StatusCode::BAD_GATEWAY,
                "Failed to start diagnosis".to_string(),
            ),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ApiError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process the request".to_string(),
            ),
            ApiError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upload failed".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }

        (status, Json(json!({ "message": message }))).into_response()
    }
}
