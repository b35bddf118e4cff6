//! Health, version and JSON metrics reports.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::json;

use crate::middleware::versioning::{CURRENT_VERSION, SUPPORTED_VERSIONS};
use crate::state::AppState;

/// GET /health: liveness only, no dependencies touched.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /api/health: readiness, including a database ping.
pub async fn api_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .is_ok();

    let status = if database_ok { "healthy" } else { "degraded" };
    let code = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "timestamp": Utc::now().to_rfc3339(),
            "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
            "components": {
                "database": if database_ok { "up" } else { "down" },
                "cache": if state.cache.is_enabled() { "enabled" } else { "disabled" },
            },
        })),
    )
}

/// GET /api/version
pub async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "api_current_version": CURRENT_VERSION,
        "api_supported_versions": SUPPORTED_VERSIONS,
        "algorithm": "LinUCB",
    }))
}

/// GET /api/metrics: operational counters as JSON; the Prometheus text
/// exposition lives at /metrics.
pub async fn api_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let products = state.catalog.count().await.unwrap_or(-1);
    let active_sessions = state.sessions.count_active().await.unwrap_or(-1);

    Json(json!({
        "success": true,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "catalog_products": products,
        "active_sessions": active_sessions,
        "cached_models": state.models.len(),
        "tracked_session_locks": state.locks.tracked_sessions(),
        "rate_limit_buckets": state.rate_limiter.tracked_buckets(),
        "cache": state.cache.stats(),
        "duplicate_guard": state.guard.stats(),
    }))
}
