use dotenvy::dotenv;
use std::collections::HashSet;
use std::env;
use std::net::IpAddr;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub session_max: u32,
    pub recommend_max: u32,
    pub feedback_max: u32,
    pub batch_max: u32,
    pub general_max: u32,
    pub whitelist: HashSet<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            session_max: 5,
            recommend_max: 30,
            feedback_max: 50,
            batch_max: 10,
            general_max: 100,
            whitelist: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            ttl_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub app_env: String,
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub enable_auto_cleanup: bool,
    pub cleanup_skip_in_production: bool,
    pub feature_dimensions: usize,
    pub enable_debug_routes: bool,
    pub default_alpha: f64,
    pub reward_skip: f64,
    pub reward_neutral: f64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let whitelist: HashSet<IpAddr> = env::var("RATE_LIMIT_WHITELIST")
            .map(|v| {
                parse_list(&v)
                    .into_iter()
                    .filter_map(|ip| ip.parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window_seconds: env_parse("RATE_LIMIT_WINDOW_SECONDS", defaults.window_seconds),
            session_max: env_parse("RATE_LIMIT_SESSION_MAX", defaults.session_max),
            recommend_max: env_parse("RATE_LIMIT_RECOMMEND_MAX", defaults.recommend_max),
            feedback_max: env_parse("RATE_LIMIT_FEEDBACK_MAX", defaults.feedback_max),
            batch_max: env_parse("RATE_LIMIT_BATCH_MAX", defaults.batch_max),
            general_max: env_parse("RATE_LIMIT_GENERAL_MAX", defaults.general_max),
            whitelist,
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            enabled: env_bool("CACHE_ENABLED", cache_defaults.enabled),
            max_size: env_parse("CACHE_MAX_SIZE", cache_defaults.max_size),
            ttl_ms: env_parse("CACHE_TTL_MS", cache_defaults.ttl_ms),
        };

        Ok(Self {
            database_url,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8080),
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            cors_origins,
            rate_limit,
            cache,
            enable_auto_cleanup: env_bool("ENABLE_AUTO_CLEANUP", true),
            cleanup_skip_in_production: env_bool("CLEANUP_SKIP_IN_PRODUCTION", false),
            feature_dimensions: env_parse("FEATURE_DIMENSIONS", 26),
            enable_debug_routes: env_bool("ENABLE_DEBUG_ROUTES", false),
            default_alpha: env_parse("DEFAULT_ALPHA", 1.0),
            reward_skip: env_parse("REWARD_SKIP", 0.0),
            reward_neutral: env_parse("REWARD_NEUTRAL", 0.0),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Fixed configuration for tests; no environment involved.
    pub fn default_for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            app_env: "test".into(),
            cors_origins: vec!["*".into()],
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            enable_auto_cleanup: false,
            cleanup_skip_in_production: false,
            feature_dimensions: 26,
            enable_debug_routes: true,
            default_alpha: 1.0,
            reward_skip: 0.0,
            reward_neutral: 0.0,
        }
    }
}
