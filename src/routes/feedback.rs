use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::guard::{DuplicateGuard, FeedbackTuple, GuardDecision, GuardedRequest};
use crate::middleware::error_handling;
use crate::models::UserAction;
use crate::state::AppState;

const MAX_BATCH_FEEDBACKS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    #[serde(alias = "sessionId")]
    pub session_id: Option<Uuid>,
    #[serde(alias = "productId")]
    pub product_id: Option<String>,
    pub action: Option<String>,
    pub context: Option<serde_json::Value>,
    #[serde(alias = "idempotencyKey")]
    #[allow(dead_code)]
    pub idempotency_key: Option<String>,
}

impl FeedbackRequest {
    /// Canonicalize into (session, product, action), reporting every missing
    /// or invalid field at once.
    fn canonicalize(&self) -> AppResult<(Uuid, String, UserAction)> {
        let mut problems = Vec::new();

        let session_id = self.session_id;
        if session_id.is_none() {
            problems.push("session_id");
        }
        let product_id = self
            .product_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        if product_id.is_none() {
            problems.push("product_id");
        }
        let action = self.action.as_deref().and_then(UserAction::parse);
        if action.is_none() {
            problems.push("action");
        }

        match (session_id, product_id, action) {
            (Some(session_id), Some(product_id), Some(action)) => {
                Ok((session_id, product_id, action))
            }
            _ => Err(AppError::validation_with_details(
                "feedback requires session_id, product_id and one of love|like|dislike|skip|neutral",
                json!({"invalid_or_missing": problems}),
            )),
        }
    }
}

/// POST /api/feedback
pub async fn post_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let (session_id, product_id, action) = body.canonicalize()?;

    let response = state
        .feedback
        .process(session_id, product_id.clone(), action, body.context)
        .await?;
    state.guard.mark_processed(session_id, &product_id);

    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchOptions {
    #[serde(default, alias = "continueOnError")]
    pub continue_on_error: bool,
    #[serde(default = "default_true", alias = "updateModelImmediately")]
    pub update_model_immediately: bool,
    #[serde(default, alias = "ignoreConflicts")]
    pub ignore_conflicts: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBatchRequest {
    pub feedbacks: Vec<FeedbackRequest>,
    #[serde(default)]
    pub options: Option<BatchOptions>,
}

/// POST /api/feedback/batch
pub async fn batch_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackBatchRequest>,
) -> Response {
    let options = body.options.unwrap_or_else(|| BatchOptions {
        continue_on_error: false,
        update_model_immediately: true,
        ignore_conflicts: false,
    });

    if body.feedbacks.is_empty() {
        return AppError::validation("feedbacks must not be empty").into_response();
    }
    if body.feedbacks.len() > MAX_BATCH_FEEDBACKS {
        return AppError::validation_with_details(
            format!("at most {MAX_BATCH_FEEDBACKS} feedback items are allowed"),
            json!({"max": MAX_BATCH_FEEDBACKS, "received": body.feedbacks.len()}),
        )
        .into_response();
    }

    // Canonicalize every item up front so conflicts report stable positions.
    let mut items: Vec<Option<(Uuid, String, UserAction, Option<serde_json::Value>)>> = Vec::new();
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (index, item) in body.feedbacks.iter().enumerate() {
        match item.canonicalize() {
            Ok((session_id, product_id, action)) => {
                items.push(Some((session_id, product_id, action, item.context.clone())));
            }
            Err(err) => {
                let (_, envelope) = error_handling::map_error(&err);
                errors.push(json!({"index": index, "error": envelope}));
                items.push(None);
                if !options.continue_on_error {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({
                            "success": false,
                            "error": "validation",
                            "message": "batch contained an invalid item",
                            "errors": errors,
                        })),
                    )
                        .into_response();
                }
            }
        }
    }

    // Intra-batch duplicate detection on (session, product).
    let tuples: Vec<FeedbackTuple> = items
        .iter()
        .flatten()
        .map(|(session_id, product_id, action, _)| FeedbackTuple {
            session_id: *session_id,
            product_id: product_id.clone(),
            action: *action,
        })
        .collect();
    let conflicts = DuplicateGuard::intra_batch_conflicts(&tuples);
    if !conflicts.is_empty() && !options.ignore_conflicts {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "error": "batch_conflict",
                "message": "batch contains duplicate (session, product) feedback items",
                "conflicts": conflicts,
                "suggestion": "retry with options.ignoreConflicts=true to process first occurrences only",
            })),
        )
            .into_response();
    }
    let duplicate_positions: std::collections::HashSet<usize> =
        conflicts.iter().map(|c| c.index).collect();

    let mut results: Vec<serde_json::Value> = Vec::new();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut flat_index = 0usize;

    for (index, item) in items.into_iter().enumerate() {
        let Some((session_id, product_id, action, context)) = item else {
            failed += 1;
            results.push(json!({"index": index, "status": "invalid"}));
            continue;
        };
        let position = flat_index;
        flat_index += 1;

        if duplicate_positions.contains(&position) {
            results.push(json!({
                "index": index,
                "status": "skipped_duplicate",
                "session_id": session_id,
                "product_id": product_id,
            }));
            continue;
        }

        // Cross-request windows still apply per item; a unique fingerprint
        // keeps the general dedup table out of the way.
        let guarded = GuardedRequest {
            fingerprint: format!("batch:{}", Uuid::new_v4()),
            idempotency_key: None,
            feedback: Some(FeedbackTuple {
                session_id,
                product_id: product_id.clone(),
                action,
            }),
        };
        match state.guard.check_and_record(&guarded) {
            GuardDecision::Proceed => {}
            decision => {
                failed += 1;
                let (kind, retry_after) = match decision {
                    GuardDecision::RapidFeedback {
                        retry_after_seconds,
                        ..
                    } => ("rapid_feedback", retry_after_seconds),
                    GuardDecision::FeedbackConflict {
                        retry_after_seconds,
                        ..
                    } => ("feedback_conflict", retry_after_seconds),
                    _ => ("duplicate_request", 0),
                };
                errors.push(json!({
                    "index": index,
                    "error": kind,
                    "retry_after_seconds": retry_after,
                }));
                results.push(json!({"index": index, "status": "conflict", "error": kind}));
                if !options.continue_on_error {
                    break;
                }
                continue;
            }
        }

        match state
            .feedback
            .process(session_id, product_id.clone(), action, context)
            .await
        {
            Ok(response) => {
                successful += 1;
                state.guard.mark_processed(session_id, &product_id);
                let summary = if options.update_model_immediately {
                    response
                } else {
                    json!({"learning_update": response.get("learning_update")})
                };
                results.push(json!({
                    "index": index,
                    "status": "processed",
                    "session_id": session_id,
                    "product_id": product_id,
                    "action": action.as_str(),
                    "response": summary,
                }));
            }
            Err(err) => {
                failed += 1;
                let (_, envelope) = error_handling::map_error(&err);
                errors.push(json!({"index": index, "error": envelope}));
                results.push(json!({"index": index, "status": "failed"}));
                if !options.continue_on_error {
                    break;
                }
            }
        }
    }

    let mut body = json!({
        "success": failed == 0,
        "successful_feedbacks": successful,
        "failed_feedbacks": failed,
        "results": results,
    });
    if !errors.is_empty() {
        body["errors"] = json!(errors);
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /api/feedback/status/{session}/{product}/{action}
pub async fn feedback_status(
    State(state): State<AppState>,
    Path((session_id, product_id, action)): Path<(Uuid, String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let action = UserAction::parse(&action)
        .ok_or_else(|| AppError::validation(format!("unknown action: {action}")))?;

    let status = state
        .guard
        .feedback_status(session_id, &product_id, action)
        .ok_or_else(|| AppError::NotFound("feedback record".into()))?;

    Ok(Json(json!({"success": true, "record": status})))
}
