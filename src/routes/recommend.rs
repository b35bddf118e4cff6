use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::error_handling;
use crate::services::recommender::RecommendFilters;
use crate::state::AppState;

const MAX_BATCH_REQUESTS: usize = 10;
const MAX_RECOMMENDATIONS_PER_CALL: usize = 10;

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    #[serde(rename = "minPrice", alias = "min_price")]
    pub min_price: Option<f64>,
    #[serde(rename = "maxPrice", alias = "max_price")]
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

impl RecommendQuery {
    fn validate(&self) -> AppResult<()> {
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(AppError::validation_with_details(
                    "minPrice must not exceed maxPrice",
                    json!({"minPrice": min, "maxPrice": max}),
                ));
            }
        }
        if self.min_price.map(|p| p < 0.0).unwrap_or(false)
            || self.max_price.map(|p| p < 0.0).unwrap_or(false)
        {
            return Err(AppError::validation("price filters must be non-negative"));
        }
        Ok(())
    }

    fn filters(&self) -> RecommendFilters {
        RecommendFilters {
            min_price: self.min_price,
            max_price: self.max_price,
            category: self.category.clone(),
        }
    }
}

/// GET /api/recommend/{sessionId}
pub async fn get_recommendation(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
) -> AppResult<Json<serde_json::Value>> {
    query.validate()?;
    let count = query.limit.unwrap_or(1).clamp(1, MAX_RECOMMENDATIONS_PER_CALL);

    let body = if count == 1 {
        state
            .recommender
            .recommend_single(session_id, query.filters())
            .await?
    } else {
        state
            .recommender
            .recommend_many(session_id, query.filters(), count)
            .await?
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct BatchRecommendationItem {
    #[serde(alias = "sessionId")]
    pub session_id: Uuid,
    pub count: Option<usize>,
    pub filters: Option<BatchFilters>,
}

#[derive(Debug, Deserialize)]
pub struct BatchFilters {
    #[serde(alias = "minPrice")]
    pub min_price: Option<f64>,
    #[serde(alias = "maxPrice")]
    pub max_price: Option<f64>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRecommendationRequest {
    pub requests: Vec<BatchRecommendationItem>,
    #[serde(rename = "globalSettings", alias = "global_settings")]
    #[allow(dead_code)]
    pub global_settings: Option<serde_json::Value>,
}

/// POST /api/recommendations/batch
pub async fn batch_recommendations(
    State(state): State<AppState>,
    Json(body): Json<BatchRecommendationRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if body.requests.is_empty() {
        return Err(AppError::validation("requests must not be empty"));
    }
    if body.requests.len() > MAX_BATCH_REQUESTS {
        return Err(AppError::validation_with_details(
            format!("at most {MAX_BATCH_REQUESTS} batch requests are allowed"),
            json!({"max": MAX_BATCH_REQUESTS, "received": body.requests.len()}),
        ));
    }

    let mut results = Vec::with_capacity(body.requests.len());
    let mut successful = 0usize;
    let mut failed = 0usize;

    for (index, item) in body.requests.into_iter().enumerate() {
        let filters = item
            .filters
            .map(|f| RecommendFilters {
                min_price: f.min_price,
                max_price: f.max_price,
                category: f.category,
            })
            .unwrap_or_default();
        let count = item.count.unwrap_or(1).clamp(1, MAX_RECOMMENDATIONS_PER_CALL);

        match state
            .recommender
            .recommend_many(item.session_id, filters, count)
            .await
        {
            Ok(response) => {
                successful += 1;
                results.push(json!({
                    "index": index,
                    "session_id": item.session_id,
                    "success": true,
                    "response": response,
                }));
            }
            Err(err) => {
                failed += 1;
                let (status, envelope) = error_handling::map_error(&err);
                results.push(json!({
                    "index": index,
                    "session_id": item.session_id,
                    "success": false,
                    "status": status.as_u16(),
                    "error": envelope,
                }));
            }
        }
    }

    Ok(Json(json!({
        "success": failed == 0,
        "successful_requests": successful,
        "failed_requests": failed,
        "results": results,
    })))
}

/// GET /api/debug/score/{sessionId}/{productId}, gated by the debug flag.
pub async fn debug_score(
    State(state): State<AppState>,
    Path((session_id, product_id)): Path<(Uuid, String)>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.config.enable_debug_routes {
        return Err(AppError::NotFound("route".into()));
    }

    let session = state
        .sessions
        .get(session_id)
        .await?
        .ok_or(AppError::SessionNotFound(session_id))?;
    let product = state
        .catalog
        .get_product(&product_id)
        .await?
        .ok_or_else(|| AppError::ProductNotFound(product_id.clone()))?;

    let x = crate::features::extract(&product);
    let stream = state.interactions.for_session(session_id).await?;
    let model = state.models.get_or_replay(&session, &stream)?;

    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "product_id": product_id,
        "ucb": model.ucb(&x)?,
        "expected_reward": model.expected_reward(&x)?,
        "confidence": model.confidence(&x)?,
        "alpha": model.alpha(),
        "interactions": model.interactions(),
    })))
}
