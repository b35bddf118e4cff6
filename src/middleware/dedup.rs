//! Request-level entry point for the duplicate guard.
//!
//! Applies to every non-GET request: buffers the body, derives the request
//! fingerprint and (for the feedback endpoint) the canonical feedback tuple,
//! then runs the guard's precedence chain. Successful responses carrying an
//! idempotency key are captured for verbatim replay.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::guard::{DuplicateGuard, FeedbackTuple, GuardDecision, GuardedRequest};
use crate::middleware::client_ip;
use crate::models::UserAction;
use crate::state::AppState;

const MAX_BUFFERED_BODY: usize = 1 << 20;

pub async fn duplicate_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() == Method::GET {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return crate::error::AppError::validation("request body could not be read")
                .into_response()
        }
    };

    let ip = client_ip(&parts.headers, &parts.extensions);
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or("").to_string();
    let fingerprint =
        DuplicateGuard::fingerprint(&ip.to_string(), parts.method.as_str(), &path, &bytes, &query);

    let json_body: Option<serde_json::Value> = serde_json::from_slice(&bytes).ok();

    let idempotency_key = parts
        .headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            json_body
                .as_ref()
                .and_then(|b| b.get("idempotency_key"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

    let feedback = if path == "/api/feedback" {
        json_body.as_ref().and_then(parse_feedback_tuple)
    } else {
        None
    };

    let guarded = GuardedRequest {
        fingerprint,
        idempotency_key: idempotency_key.clone(),
        feedback,
    };

    match state.guard.check_and_record(&guarded) {
        GuardDecision::Proceed => {
            let req = Request::from_parts(parts, Body::from(bytes));
            let response = next.run(req).await;
            match idempotency_key {
                Some(key) if response.status().is_success() => {
                    capture_for_replay(&state, &key, response).await
                }
                _ => response,
            }
        }
        GuardDecision::IdempotentReplay {
            status,
            body,
            content_type,
        } => {
            let mut response = Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            let headers = response.headers_mut();
            if let Some(content_type) = content_type.and_then(|v| HeaderValue::from_str(&v).ok()) {
                headers.insert(header::CONTENT_TYPE, content_type);
            }
            headers.insert("X-Idempotent-Replay", HeaderValue::from_static("true"));
            headers.insert(
                "X-Duplicate-Detection",
                HeaderValue::from_static("idempotent_retry"),
            );
            response
        }
        GuardDecision::RapidFeedback {
            retry_after_seconds,
            first_seen,
        } => conflict_response(
            "rapid_feedback",
            "feedback for this product was just submitted; wait before retrying",
            retry_after_seconds,
            first_seen,
        ),
        GuardDecision::FeedbackConflict {
            retry_after_seconds,
            first_seen,
        } => conflict_response(
            "feedback_conflict",
            "this product already received feedback in the current window",
            retry_after_seconds,
            first_seen,
        ),
        GuardDecision::DuplicateRequest {
            retry_after_seconds,
        } => {
            let body = json!({
                "success": false,
                "error": "duplicate_request",
                "message": "an identical request was received moments ago",
                "retry_after_seconds": retry_after_seconds,
                "timestamp": Utc::now().to_rfc3339(),
            });
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
    }
}

fn parse_feedback_tuple(body: &serde_json::Value) -> Option<FeedbackTuple> {
    let session_id = body
        .get("session_id")
        .or_else(|| body.get("sessionId"))
        .and_then(|v| v.as_str())
        .and_then(|v| Uuid::parse_str(v).ok())?;
    let product_id = body
        .get("product_id")
        .or_else(|| body.get("productId"))
        .and_then(|v| v.as_str())?
        .to_string();
    let action = body
        .get("action")
        .and_then(|v| v.as_str())
        .and_then(UserAction::parse)?;
    Some(FeedbackTuple {
        session_id,
        product_id,
        action,
    })
}

fn conflict_response(
    kind: &str,
    suggestion: &str,
    retry_after_seconds: u64,
    first_seen: DateTime<Utc>,
) -> Response {
    let body = json!({
        "success": false,
        "error": kind,
        "message": format!("conflicting feedback detected ({kind})"),
        "conflict_info": {
            "type": kind,
            "timestamp": first_seen.to_rfc3339(),
            "suggestion": suggestion,
        },
        "retry_after_seconds": retry_after_seconds,
        "timestamp": Utc::now().to_rfc3339(),
    });
    (StatusCode::CONFLICT, Json(body)).into_response()
}

/// Buffer the successful response so an idempotent retry can replay it
/// byte-for-byte, then hand the same bytes back to the client.
async fn capture_for_replay(state: &AppState, key: &str, response: Response) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state
        .guard
        .store_response(key, parts.status.as_u16(), bytes.to_vec(), content_type);
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_tuple_accepts_both_field_spellings() {
        let snake = json!({
            "session_id": "c56a4180-65aa-42ec-a945-5fd21dec0538",
            "product_id": "P1",
            "action": "like",
        });
        let camel = json!({
            "sessionId": "c56a4180-65aa-42ec-a945-5fd21dec0538",
            "productId": "P1",
            "action": "like",
        });
        let a = parse_feedback_tuple(&snake).unwrap();
        let b = parse_feedback_tuple(&camel).unwrap();
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.product_id, b.product_id);
    }

    #[test]
    fn malformed_bodies_yield_no_tuple() {
        assert!(parse_feedback_tuple(&json!({"action": "like"})).is_none());
        assert!(parse_feedback_tuple(&json!({
            "session_id": "not-a-uuid",
            "product_id": "P1",
            "action": "like",
        }))
        .is_none());
        assert!(parse_feedback_tuple(&json!({
            "session_id": "c56a4180-65aa-42ec-a945-5fd21dec0538",
            "product_id": "P1",
            "action": "adore",
        }))
        .is_none());
    }
}
