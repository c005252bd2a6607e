use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/pd/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let buffered = state
        .deliveries
        .lock()
        .map(|buffer| buffer.len())
        .unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "buffered_deliveries": buffered,
    }))
}
