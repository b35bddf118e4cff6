//! Maps domain errors to the JSON error envelope.

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::error::AppError;

pub fn map_error(err: &AppError) -> (StatusCode, serde_json::Value) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    // Internal failures get a trace id in the logs and a generic message out.
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        let trace_id = Uuid::new_v4();
        error!(trace_id = %trace_id, error = %err, "internal error");
        match err {
            AppError::ModelSingular => err.to_string(),
            _ => format!("internal server error (trace {trace_id})"),
        }
    } else {
        err.to_string()
    };

    let mut body = json!({
        "success": false,
        "error": err.kind(),
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    });

    if let AppError::Validation {
        details: Some(details),
        ..
    } = err
    {
        body["details"] = details.clone();
    }

    (status, body)
}

pub fn into_response(err: AppError) -> impl IntoResponse {
    let (status, body) = map_error(&err);
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_kind_and_message() {
        let (status, body) = map_error(&AppError::NoCandidates);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "no_candidates");
        assert!(body["message"].as_str().unwrap().contains("candidates"));
    }

    #[test]
    fn validation_details_are_included() {
        let err = AppError::validation_with_details(
            "missing fields",
            serde_json::json!({"missing": ["session_id"]}),
        );
        let (status, body) = map_error(&err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"]["missing"][0], "session_id");
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let (_, body) = map_error(&AppError::Internal("secret detail".into()));
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }
}
