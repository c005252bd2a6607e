//! Read side of the delivery buffer: notifications the monitor decided
//! to surface, newest first, filtered to one user.

use crate::server::AppState;
use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Json};
use pd_core::UserId;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/pd/notifications/{user_id}", get(get_notifications))
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id))]
async fn get_notifications(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Json<serde_json::Value> {
    let notifications: Vec<serde_json::Value> = state
        .deliveries
        .lock()
        .map(|buffer| {
            buffer
                .iter()
                .rev()
                .filter(|d| d.user_id == user_id && d.outcome.decision.should_notify)
                .map(|d| {
                    serde_json::json!({
                        "source": d.outcome.source,
                        "decision": d.outcome.decision,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Json(serde_json::json!({
        "status": "ok",
        "notifications": notifications,
    }))
}
