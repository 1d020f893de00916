use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{RelayError, SupervisorError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Worker `{0}` not found")]
    WorkerNotFound(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Supervisor(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Relay(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Supervisor(_) | ApiError::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::WorkerNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
