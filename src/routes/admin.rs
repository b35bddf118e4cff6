//! Guard and cache administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/duplicate-detection/stats
pub async fn duplicate_detection_stats(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "success": true,
        "stats": state.guard.stats(),
    })))
}

/// POST /api/duplicate-detection/reset, development only.
pub async fn duplicate_detection_reset(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.config.enable_debug_routes {
        return Err(AppError::NotFound("route".into()));
    }
    state.guard.reset();
    Ok(Json(json!({
        "success": true,
        "message": "duplicate detection state cleared",
    })))
}

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "success": true,
        "stats": state.cache.stats(),
    })))
}

/// POST /api/cache/clear
pub async fn cache_clear(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let cleared = state.cache.clear();
    Ok(Json(json!({
        "success": true,
        "cleared_entries": cleared,
    })))
}

/// POST /api/cache/invalidate/session/{id}
pub async fn cache_invalidate_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let invalidated = state.cache.invalidate_session(session_id);
    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "invalidated_entries": invalidated,
    })))
}
