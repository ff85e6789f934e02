use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use outbox_core::domain::common::CoreError;
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::http::{health::routes::health_routes, outbox::routes::outbox_routes};

pub mod app_state;

pub use app_state::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Startup error: {0}")]
    StartupError(String),
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::EntityNotFound { .. } | CoreError::OutboxEntryNotFound { .. } => {
                ApiError::NotFound(error.to_string())
            }
            CoreError::InvalidEntity { .. } => ApiError::BadRequest(error.to_string()),
            CoreError::ServiceUnavailable(_) => ApiError::ServiceUnavailable(error.to_string()),
            CoreError::StorageError { .. }
            | CoreError::TransientPublishError { .. }
            | CoreError::PermanentPublishFailure { .. }
            | CoreError::SerializationError { .. } => {
                ApiError::InternalServerError(error.to_string())
            }
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalServerError(_) | ApiError::StartupError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Full HTTP surface of the relay.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(outbox_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
