//! Per-source-IP sliding-window rate limiting, one bucket per endpoint class.
//!
//! Rejections carry `Retry-After` plus the `X-RateLimit-*` headers and a JSON
//! body echoing the same numbers. A static whitelist bypasses every class.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::middleware::client_ip;
use crate::state::AppState;

/// Endpoint classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Session,
    Recommend,
    Feedback,
    Batch,
    General,
}

impl EndpointClass {
    pub fn classify(path: &str) -> Self {
        if path == "/api/session" {
            EndpointClass::Session
        } else if path == "/api/recommendations/batch" || path == "/api/feedback/batch" {
            EndpointClass::Batch
        } else if path.starts_with("/api/recommend/") {
            EndpointClass::Recommend
        } else if path.starts_with("/api/feedback") {
            EndpointClass::Feedback
        } else {
            EndpointClass::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Session => "session",
            EndpointClass::Recommend => "recommend",
            EndpointClass::Feedback => "feedback",
            EndpointClass::Batch => "batch",
            EndpointClass::General => "general",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RateDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset: DateTime<Utc>,
    },
    Limited {
        limit: u32,
        retry_after_seconds: u64,
        reset: DateTime<Utc>,
    },
}

pub struct RateLimiter {
    config: RateLimitConfig,
    window: Duration,
    buckets: DashMap<(IpAddr, EndpointClass), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_seconds);
        Self {
            config,
            window,
            buckets: DashMap::new(),
        }
    }

    fn limit_for(&self, class: EndpointClass) -> u32 {
        match class {
            EndpointClass::Session => self.config.session_max,
            EndpointClass::Recommend => self.config.recommend_max,
            EndpointClass::Feedback => self.config.feedback_max,
            EndpointClass::Batch => self.config.batch_max,
            EndpointClass::General => self.config.general_max,
        }
    }

    /// Count this request against the caller's window, or reject it.
    pub fn check(&self, ip: IpAddr, class: EndpointClass) -> RateDecision {
        let limit = self.limit_for(class);

        if self.config.whitelist.contains(&ip) {
            return RateDecision::Allowed {
                limit,
                remaining: limit,
                reset: Utc::now() + chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::zero()),
            };
        }

        let now = Instant::now();
        let mut bucket = self.buckets.entry((ip, class)).or_default();
        while let Some(front) = bucket.front() {
            if now.duration_since(*front) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() as u32 >= limit {
            let until_reset = match bucket.front() {
                Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                None => self.window,
            };
            let reset = Utc::now() + chrono::Duration::from_std(until_reset).unwrap_or_else(|_| chrono::Duration::zero());
            return RateDecision::Limited {
                limit,
                retry_after_seconds: until_reset.as_secs().max(1),
                reset,
            };
        }

        bucket.push_back(now);
        let remaining = limit - bucket.len() as u32;
        let reset = Utc::now() + chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::zero());
        RateDecision::Allowed {
            limit,
            remaining,
            reset,
        }
    }

    /// Drop buckets whose entries have all aged out.
    pub fn cleanup(&self) -> usize {
        let before = self.buckets.len();
        let window = self.window;
        self.buckets.retain(|_, bucket| {
            bucket
                .back()
                .map(|last| last.elapsed() < window)
                .unwrap_or(false)
        });
        before - self.buckets.len()
    }

    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn window_seconds(&self) -> u64 {
        self.config.window_seconds
    }
}

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = client_ip(req.headers(), req.extensions());
    let class = EndpointClass::classify(req.uri().path());

    match state.rate_limiter.check(ip, class) {
        RateDecision::Allowed {
            limit,
            remaining,
            reset,
        } => {
            let mut response = next.run(req).await;
            apply_headers(response.headers_mut(), limit, remaining, reset);
            response
        }
        RateDecision::Limited {
            limit,
            retry_after_seconds,
            reset,
        } => {
            warn!(ip = %ip, class = class.as_str(), "rate limit exceeded");
            let body = json!({
                "success": false,
                "error": "rate_limited",
                "message": format!(
                    "rate limit exceeded for the {} endpoint class",
                    class.as_str()
                ),
                "limit": limit,
                "window_seconds": state.rate_limiter.window_seconds(),
                "retry_after_seconds": retry_after_seconds,
                "reset": reset.to_rfc3339(),
            });
            let mut response: Response<Body> =
                (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            apply_headers(response.headers_mut(), limit, 0, reset);
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

fn apply_headers(
    headers: &mut axum::http::HeaderMap,
    limit: u32,
    remaining: u32,
    reset: DateTime<Utc>,
) {
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&reset.to_rfc3339()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn limiter(window_seconds: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window_seconds,
            session_max: 5,
            recommend_max: 30,
            feedback_max: 50,
            batch_max: 10,
            general_max: 100,
            whitelist: HashSet::new(),
        })
    }

    #[test]
    fn classifies_endpoint_paths() {
        assert_eq!(
            EndpointClass::classify("/api/session"),
            EndpointClass::Session
        );
        assert_eq!(
            EndpointClass::classify("/api/recommend/abc"),
            EndpointClass::Recommend
        );
        assert_eq!(
            EndpointClass::classify("/api/feedback"),
            EndpointClass::Feedback
        );
        assert_eq!(
            EndpointClass::classify("/api/feedback/status/a/b/c"),
            EndpointClass::Feedback
        );
        assert_eq!(
            EndpointClass::classify("/api/feedback/batch"),
            EndpointClass::Batch
        );
        assert_eq!(
            EndpointClass::classify("/api/recommendations/batch"),
            EndpointClass::Batch
        );
        assert_eq!(
            EndpointClass::classify("/api/cache/stats"),
            EndpointClass::General
        );
    }

    #[test]
    fn limit_plus_one_is_rejected_with_retry_after() {
        let limiter = limiter(60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(matches!(
                limiter.check(ip, EndpointClass::Session),
                RateDecision::Allowed { .. }
            ));
        }
        match limiter.check(ip, EndpointClass::Session) {
            RateDecision::Limited {
                limit,
                retry_after_seconds,
                ..
            } => {
                assert_eq!(limit, 5);
                assert!(retry_after_seconds >= 1);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn classes_have_independent_budgets() {
        let limiter = limiter(60);
        let ip: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..5 {
            limiter.check(ip, EndpointClass::Session);
        }
        assert!(matches!(
            limiter.check(ip, EndpointClass::Session),
            RateDecision::Limited { .. }
        ));
        // Same IP still has recommend budget.
        assert!(matches!(
            limiter.check(ip, EndpointClass::Recommend),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn ips_have_independent_budgets() {
        let limiter = limiter(60);
        let a: IpAddr = "10.0.0.3".parse().unwrap();
        let b: IpAddr = "10.0.0.4".parse().unwrap();

        for _ in 0..5 {
            limiter.check(a, EndpointClass::Session);
        }
        assert!(matches!(
            limiter.check(b, EndpointClass::Session),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn whitelisted_ips_bypass_every_class() {
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        let mut whitelist = HashSet::new();
        whitelist.insert(ip);
        let limiter = RateLimiter::new(RateLimitConfig {
            window_seconds: 60,
            session_max: 1,
            recommend_max: 1,
            feedback_max: 1,
            batch_max: 1,
            general_max: 1,
            whitelist,
        });

        for _ in 0..10 {
            assert!(matches!(
                limiter.check(ip, EndpointClass::Session),
                RateDecision::Allowed { .. }
            ));
        }
    }

    #[test]
    fn window_expiry_frees_budget() {
        let limiter = limiter(1);
        let ip: IpAddr = "10.0.0.5".parse().unwrap();

        for _ in 0..5 {
            limiter.check(ip, EndpointClass::Session);
        }
        assert!(matches!(
            limiter.check(ip, EndpointClass::Session),
            RateDecision::Limited { .. }
        ));

        std::thread::sleep(Duration::from_millis(1100));
        assert!(matches!(
            limiter.check(ip, EndpointClass::Session),
            RateDecision::Allowed { .. }
        ));
        assert!(limiter.cleanup() <= limiter.tracked_buckets() + 1);
    }
}
