//! Message and conversation ingest. Collaborating chat systems post
//! their traffic here; the monitor fans each message out to every
//! recipient's debounce state.

use crate::routes::ApiError;
use crate::server::AppState;
use axum::routing::post;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use pd_core::{ConversationId, ConversationStore, ConversationSummary, Message, UserId};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ConversationRequest {
    id: ConversationId,
    name: String,
    #[serde(default)]
    is_group: bool,
    participants: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    id: String,
    conversation_id: ConversationId,
    text: String,
    sender_id: UserId,
    sender_name: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ActiveRequest {
    user_id: UserId,
    conversation_id: Option<ConversationId>,
}

#[derive(Debug, Deserialize)]
struct ReadRequest {
    user_id: UserId,
    conversation_id: ConversationId,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/pd/conversations", post(put_conversation))
        .route("/api/v1/pd/messages", post(post_message))
        .route("/api/v1/pd/active", post(post_active))
        .route("/api/v1/pd/read", post(post_read))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn put_conversation(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ConversationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.participants.is_empty() {
        return Err(pd_core::CoreError::Validation(
            "conversation needs at least one participant".to_string(),
        )
        .into());
    }
    state.store.add_conversation(ConversationSummary {
        id: req.id,
        name: req.name,
        unread_count: 0,
        is_group: req.is_group,
        participants: req.participants,
        last_activity: Utc::now(),
    });
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[tracing::instrument(level = "info", skip_all, fields(conversation_id = %req.conversation_id))]
async fn post_message(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation = state
        .store
        .conversation(&req.conversation_id)
        .await?
        .ok_or_else(|| {
            pd_core::CoreError::NotFound(format!(
                "unknown conversation {}",
                req.conversation_id
            ))
        })?;

    let message = Message {
        id: req.id.into(),
        conversation_id: req.conversation_id,
        text: req.text,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
        sender_id: req.sender_id,
        sender_name: req.sender_name,
    };
    state.store.add_message(message.clone())?;

    let mut recipients = 0;
    for participant in &conversation.participants {
        if *participant == message.sender_id {
            continue;
        }
        state.monitor.record_message(participant, &message).await;
        recipients += 1;
    }
    Ok(Json(serde_json::json!({ "status": "ok", "recipients": recipients })))
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %req.user_id))]
async fn post_active(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ActiveRequest>,
) -> Json<serde_json::Value> {
    state
        .monitor
        .set_active_conversation(&req.user_id, req.conversation_id);
    Json(serde_json::json!({ "status": "ok" }))
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %req.user_id))]
async fn post_read(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ReadRequest>,
) -> Json<serde_json::Value> {
    state.store.mark_read(&req.user_id, &req.conversation_id);
    state
        .monitor
        .reset_conversation(&req.user_id, &req.conversation_id);
    Json(serde_json::json!({ "status": "ok" }))
}
