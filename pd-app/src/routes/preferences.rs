use crate::routes::ApiError;
use crate::server::AppState;
use axum::extract::Path;
use axum::routing::{get, put};
use axum::{Extension, Json};
use pd_core::{CoreError, UserId, UserPreferences};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/pd/preferences/{user_id}", get(get_preferences))
        .route("/api/v1/pd/preferences/{user_id}", put(put_preferences))
}

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id))]
async fn get_preferences(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let preferences = state.preferences.get(&user_id).await?.unwrap_or_default();
    Ok(Json(serde_json::json!({
        "status": "ok",
        "preferences": preferences,
    })))
}

#[tracing::instrument(level = "info", skip_all, fields(user_id = %user_id))]
async fn put_preferences(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(preferences): Json<UserPreferences>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if preferences.pause_threshold_seconds == 0 {
        return Err(
            CoreError::Validation("pause_threshold_seconds must be > 0".to_string()).into(),
        );
    }
    if let Some(quiet) = &preferences.quiet_hours {
        if quiet.start_hour > 23 || quiet.end_hour > 23 {
            return Err(CoreError::Validation(
                "quiet hours must use 0-23 hour values".to_string(),
            )
            .into());
        }
    }
    state.preferences.put(&user_id, &preferences).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
