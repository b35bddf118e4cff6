use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fashion_recommendation_service::bandit::RewardMap;
use fashion_recommendation_service::cache::RecommendationCache;
use fashion_recommendation_service::config::Config;
use fashion_recommendation_service::guard::{DuplicateGuard, GuardConfig};
use fashion_recommendation_service::middleware::rate_limit::RateLimiter;
use fashion_recommendation_service::services::catalog::CatalogService;
use fashion_recommendation_service::services::feedback::FeedbackService;
use fashion_recommendation_service::services::history::HistoryStore;
use fashion_recommendation_service::services::interactions::InteractionLog;
use fashion_recommendation_service::services::locks::SessionLocks;
use fashion_recommendation_service::services::model_cache::ModelCache;
use fashion_recommendation_service::services::recommender::RecommendationService;
use fashion_recommendation_service::services::sessions::SessionStore;
use fashion_recommendation_service::state::AppState;
use fashion_recommendation_service::{db, error, migrations, routes};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        "starting {} v{} ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.app_env
    );

    let pool = db::init_pool(&config.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Schema must be in sync before serving traffic.
    migrations::run_all(&pool)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    let guard = Arc::new(DuplicateGuard::new(GuardConfig::default()));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let cache = Arc::new(RecommendationCache::new(
        config.cache.enabled,
        config.cache.max_size,
        Duration::from_millis(config.cache.ttl_ms),
    ));

    let catalog = Arc::new(CatalogService::new(pool.clone()));
    let sessions = Arc::new(SessionStore::new(pool.clone()));
    let history = Arc::new(HistoryStore::new(pool.clone()));
    let interactions = Arc::new(InteractionLog::new(pool.clone()));
    let locks = Arc::new(SessionLocks::new());
    let models = Arc::new(ModelCache::new());

    let rewards = RewardMap {
        skip: config.reward_skip,
        neutral: config.reward_neutral,
        ..RewardMap::default()
    };

    let recommender = Arc::new(RecommendationService::new(
        catalog.clone(),
        history.clone(),
        sessions.clone(),
        interactions.clone(),
        cache.clone(),
        locks.clone(),
        models.clone(),
    ));
    let feedback = Arc::new(FeedbackService::new(
        pool.clone(),
        catalog.clone(),
        history.clone(),
        sessions.clone(),
        interactions.clone(),
        cache.clone(),
        locks.clone(),
        models.clone(),
        rewards,
    ));

    let state = AppState {
        db: pool,
        config: config.clone(),
        guard: guard.clone(),
        rate_limiter: rate_limiter.clone(),
        cache: cache.clone(),
        catalog,
        sessions,
        history,
        interactions,
        locks,
        models,
        recommender,
        feedback,
        started_at: Utc::now(),
    };

    spawn_cleanup_tasks(&config, guard, cache, rate_limiter);

    let router = routes::build_router(state).layer(cors_layer(&config));

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?;
    tracing::info!(%bind_addr, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| error::AppError::StartServer(format!("serve: {e}")))?;

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if config.cors_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

/// One maintenance tick per table, every 60 seconds.
fn spawn_cleanup_tasks(
    config: &Config,
    guard: Arc<DuplicateGuard>,
    cache: Arc<RecommendationCache>,
    rate_limiter: Arc<RateLimiter>,
) {
    if !config.enable_auto_cleanup || (config.is_production() && config.cleanup_skip_in_production)
    {
        tracing::info!("automatic cleanup tasks disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            let guard_removed = guard.cleanup_expired();
            let cache_removed = cache.cleanup_expired();
            let buckets_removed = rate_limiter.cleanup();
            tracing::debug!(
                guard_removed,
                cache_removed,
                buckets_removed,
                "maintenance sweep complete"
            );
        }
    });
}
