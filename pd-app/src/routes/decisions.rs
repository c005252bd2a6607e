use crate::routes::ApiError;
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::routing::{get, post};
use axum::{Extension, Json};
use pd_core::{ConversationId, UserId};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    user_id: UserId,
    conversation_id: ConversationId,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/pd/decisions/analyze", post(post_analyze))
        .route("/api/v1/pd/decisions/{user_id}", get(get_history))
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %req.user_id, conversation_id = %req.conversation_id))]
async fn post_analyze(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .engine
        .decide(&req.user_id, &req.conversation_id)
        .await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "source": outcome.source,
        "decision": outcome.decision,
    })))
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id))]
async fn get_history(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state
        .decisions
        .list_for_user(&user_id, query.limit.min(500))
        .await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "decisions": records,
    })))
}
