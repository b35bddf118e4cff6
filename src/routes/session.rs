use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    #[allow(dead_code)]
    pub context: Option<serde_json::Value>,
}

/// POST /api/session
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let user_id = body
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::validation_with_details(
                "userId is required",
                json!({"missing": ["userId"]}),
            )
        })?;

    let session = state
        .sessions
        .create(
            user_id,
            state.config.default_alpha,
            state.config.feature_dimensions,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "session_id": session.session_id,
            "algorithm": "LinUCB",
            "configuration": {
                "alpha": session.alpha,
                "feature_dimensions": session.dimensions,
                "exploration_strategy": "adaptive_decay",
            },
        })),
    ))
}
