use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use std::sync::Arc;

use crate::cache::RecommendationCache;
use crate::config::Config;
use crate::guard::DuplicateGuard;
use crate::middleware::rate_limit::RateLimiter;
use crate::services::catalog::CatalogService;
use crate::services::feedback::FeedbackService;
use crate::services::history::HistoryStore;
use crate::services::interactions::InteractionLog;
use crate::services::locks::SessionLocks;
use crate::services::model_cache::ModelCache;
use crate::services::recommender::RecommendationService;
use crate::services::sessions::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub config: Arc<Config>,
    pub guard: Arc<DuplicateGuard>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<RecommendationCache>,
    pub catalog: Arc<CatalogService>,
    pub sessions: Arc<SessionStore>,
    pub history: Arc<HistoryStore>,
    pub interactions: Arc<InteractionLog>,
    pub locks: Arc<SessionLocks>,
    pub models: Arc<ModelCache>,
    pub recommender: Arc<RecommendationService>,
    pub feedback: Arc<FeedbackService>,
    pub started_at: DateTime<Utc>,
}
