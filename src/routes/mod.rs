use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::middleware::{dedup, logging, rate_limit, versioning};
use crate::state::AppState;

pub mod admin;
pub mod feedback;
pub mod observability;
pub mod recommend;
pub mod session;

use admin::{
    cache_clear, cache_invalidate_session, cache_stats, duplicate_detection_reset,
    duplicate_detection_stats,
};
use feedback::{batch_feedback, feedback_status, post_feedback};
use observability::{api_health, api_metrics, health, version};
use recommend::{batch_recommendations, debug_score, get_recommendation};
use session::create_session;

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/api/health", get(api_health))
        .route("/api/version", get(version))
        .route("/api/metrics", get(api_metrics))
        .route("/api/session", post(create_session))
        .route("/api/recommend/:session_id", get(get_recommendation))
        .route("/api/recommendations/batch", post(batch_recommendations))
        .route("/api/feedback", post(post_feedback))
        .route("/api/feedback/batch", post(batch_feedback))
        .route(
            "/api/feedback/status/:session_id/:product_id/:action",
            get(feedback_status),
        )
        .route("/api/duplicate-detection/stats", get(duplicate_detection_stats))
        .route("/api/duplicate-detection/reset", post(duplicate_detection_reset))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/clear", post(cache_clear))
        .route(
            "/api/cache/invalidate/session/:session_id",
            post(cache_invalidate_session),
        )
        .route("/api/debug/score/:session_id/:product_id", get(debug_score));

    // Layer order, innermost first: metrics (route_layer, so MatchedPath is
    // set), rate limiter, duplicate guard, versioning, then request tracing
    // outermost. Duplicates are rejected before they consume rate budget.
    let router = router
        .route_layer(axum::middleware::from_fn(crate::metrics::track))
        .layer(from_fn_with_state(state.clone(), rate_limit::rate_limit))
        .layer(from_fn_with_state(state.clone(), dedup::duplicate_guard))
        .layer(axum::middleware::from_fn(versioning::versioning));

    logging::add_tracing(router).with_state(state)
}
