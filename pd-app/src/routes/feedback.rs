use crate::routes::ApiError;
use crate::server::AppState;
use axum::routing::post;
use axum::{Extension, Json};
use pd_core::{ConversationId, Feedback, MessageId, UserId};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    user_id: UserId,
    conversation_id: ConversationId,
    message_id: MessageId,
    feedback: Feedback,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/pd/feedback", post(post_feedback))
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %req.user_id, message_id = %req.message_id))]
async fn post_feedback(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .feedback
        .submit(
            &req.user_id,
            &req.conversation_id,
            &req.message_id,
            req.feedback,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "feedback_id": record.id,
        "submitted_at": record.submitted_at,
    })))
}
