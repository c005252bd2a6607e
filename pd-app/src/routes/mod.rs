pub mod decisions;
pub mod feedback;
pub mod health;
pub mod messages;
pub mod notifications;
pub mod preferences;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pd_core::CoreError;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(messages::router())
        .merge(decisions::router())
        .merge(feedback::router())
        .merge(preferences::router())
        .merge(notifications::router())
}

/// Maps domain errors onto HTTP statuses at the route boundary.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Authorization(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Transient(_) | CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(serde_json::json!({ "status": "error", "error": self.0.to_string() })),
        )
            .into_response()
    }
}
