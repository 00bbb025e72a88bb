use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use pulse_types::ChatError;

pub type ApiResult<T> = Result<T, ApiError>;

/// REST-facing failure. Pipeline and store errors arrive as [`ChatError`];
/// the remaining variants cover cases only the HTTP surface produces.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    Conflict(&'static str),

    #[error("payload too large")]
    PayloadTooLarge,
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Chat(ChatError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Chat(err) => match err {
                ChatError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                ChatError::AccessDenied | ChatError::Forbidden(_) => {
                    (StatusCode::FORBIDDEN, err.to_string())
                }
                ChatError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                ChatError::TransientStore(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage busy, retry shortly".to_string(),
                ),
                ChatError::EnrichmentUnavailable | ChatError::Internal(_) => {
                    error!("request failed: {}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_string(),
                    )
                }
            },
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, (*msg).to_string()),
            ApiError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
        };

        (status, Json(json!({ "error": { "message": message } }))).into_response()
    }
}
