//! Recommendation orchestrator: session → history → rules → candidates →
//! scores → stochastic selection → record → response.

use rand::thread_rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bandit::{ConfidenceTier, ModelSnapshot};
use crate::cache::RecommendationCache;
use crate::error::{AppError, AppResult};
use crate::features;
use crate::models::{Product, UserSession, HISTORY_RETENTION};
use crate::services::catalog::{CandidateQuery, CatalogService};
use crate::services::diversity::{
    self, AvoidanceRules, ScoredCandidate, UserProfile,
};
use crate::services::history::HistoryStore;
use crate::services::interactions::InteractionLog;
use crate::services::locks::SessionLocks;
use crate::services::model_cache::ModelCache;
use crate::services::sessions::SessionStore;

/// Caller-supplied candidate filters, canonical form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendFilters {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedItem {
    pub product: Product,
    pub confidence_score: f64,
    pub base_score: f64,
    pub expected_reward: f64,
    pub diversity_bonus: f64,
    pub exploration_bonus: f64,
    pub algorithm: &'static str,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub products_seen: i64,
    pub total_interactions: i32,
    pub current_alpha: f64,
    pub confidence: ConfidenceTier,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiversityInfo {
    pub excluded_products: usize,
    pub avoided_categories: Vec<String>,
    pub avoided_colors: Vec<String>,
    pub avoided_brands: Vec<String>,
    pub candidate_pool_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationSet {
    pub items: Vec<RecommendedItem>,
    pub user_stats: UserStats,
    pub diversity_info: DiversityInfo,
    pub filters_applied: RecommendFilters,
    pub partial: bool,
}

pub struct RecommendationService {
    catalog: Arc<CatalogService>,
    history: Arc<HistoryStore>,
    sessions: Arc<SessionStore>,
    interactions: Arc<InteractionLog>,
    cache: Arc<RecommendationCache>,
    locks: Arc<SessionLocks>,
    models: Arc<ModelCache>,
}

impl RecommendationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<CatalogService>,
        history: Arc<HistoryStore>,
        sessions: Arc<SessionStore>,
        interactions: Arc<InteractionLog>,
        cache: Arc<RecommendationCache>,
        locks: Arc<SessionLocks>,
        models: Arc<ModelCache>,
    ) -> Self {
        Self {
            catalog,
            history,
            sessions,
            interactions,
            cache,
            locks,
            models,
        }
    }

    /// Single-recommendation response shape.
    pub async fn recommend_single(
        &self,
        session_id: Uuid,
        filters: RecommendFilters,
    ) -> AppResult<serde_json::Value> {
        self.recommend(session_id, filters, 1, true).await
    }

    /// Multi-recommendation response shape for the batch endpoint.
    pub async fn recommend_many(
        &self,
        session_id: Uuid,
        filters: RecommendFilters,
        count: usize,
    ) -> AppResult<serde_json::Value> {
        self.recommend(session_id, filters, count, false).await
    }

    async fn recommend(
        &self,
        session_id: Uuid,
        filters: RecommendFilters,
        count: usize,
        single: bool,
    ) -> AppResult<serde_json::Value> {
        let _writer = self.locks.acquire(session_id).await;

        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;
        if !session.is_active() {
            return Err(AppError::SessionInactive(session_id));
        }

        let history = self
            .history
            .get_history(session_id, HISTORY_RETENTION)
            .await?;
        let history_length = history.len() as i64;

        let cache_key =
            RecommendationCache::key(session_id, &(&filters, count, single), count, history_length);
        if let Some(cached) = self.cache.get(&cache_key, history_length) {
            return Ok(cached);
        }

        let seen_ids: Vec<String> = {
            let mut seen = HashSet::new();
            history
                .iter()
                .filter(|e| seen.insert(e.product_id.clone()))
                .map(|e| e.product_id.clone())
                .collect()
        };
        let seen_products = self.catalog.get_products_by_ids(&seen_ids).await?;

        let exclusion = diversity::exclusion_set(&history);
        let rules = diversity::avoidance_rules(&history, &seen_products);
        let profile = diversity::build_profile(&history, &seen_products);

        let candidates = self
            .catalog
            .sample_candidates(&CandidateQuery {
                min_price: filters.min_price,
                max_price: filters.max_price,
                category: filters.category.clone(),
                exclude_ids: exclusion.clone(),
                avoid_categories: rules.categories.clone(),
                avoid_colors: rules.colors.clone(),
                avoid_brands: rules.brands.clone(),
            })
            .await?;
        if candidates.is_empty() {
            return Err(AppError::NoCandidates);
        }
        let pool_size = candidates.len();

        let stream = self.interactions.for_session(session_id).await?;
        let model = self.models.get_or_replay(&session, &stream)?;
        let snapshot = model.snapshot().map_err(AppError::from)?;

        let scored = score_candidates(
            candidates,
            &snapshot,
            &profile,
            session.total_interactions,
        );
        if scored.is_empty() {
            return Err(AppError::NoCandidates);
        }

        let selected = diversity::select_top_k(scored, count, &mut thread_rng());
        let partial = selected.len() < count;
        let returned = selected.len() as i64;

        for item in &selected {
            self.history
                .record_shown(session_id, &item.product.product_id)
                .await?;
        }

        info!(
            session_id = %session_id,
            returned = selected.len(),
            pool_size,
            excluded = exclusion.len(),
            "recommendation served"
        );

        let set = RecommendationSet {
            items: selected
                .into_iter()
                .map(|c| into_item(c, &session))
                .collect(),
            user_stats: UserStats {
                products_seen: history_length + returned,
                total_interactions: session.total_interactions,
                current_alpha: model.alpha(),
                confidence: ConfidenceTier::from_model(
                    session.total_interactions.max(0) as u32,
                    model.theta_norm(),
                ),
            },
            diversity_info: DiversityInfo {
                excluded_products: exclusion.len(),
                avoided_categories: rules.categories.clone(),
                avoided_colors: rules.colors.clone(),
                avoided_brands: rules.brands.clone(),
                candidate_pool_size: pool_size,
            },
            filters_applied: filters,
            partial,
        };

        let response = shape_response(set, single);
        self.cache
            .insert(cache_key, response.clone(), history_length);
        Ok(response)
    }
}

fn score_candidates(
    candidates: Vec<Product>,
    snapshot: &ModelSnapshot,
    profile: &UserProfile,
    total_interactions: i32,
) -> Vec<ScoredCandidate> {
    let exploration = diversity::exploration_bonus(total_interactions);
    candidates
        .into_iter()
        .filter_map(|product| {
            if !features::is_valid(&product.feature_vector) {
                warn!(product_id = %product.product_id, "dropping candidate with invalid feature vector");
                return None;
            }
            let expected = snapshot.expected_reward(&product.feature_vector);
            let confidence = snapshot.confidence(&product.feature_vector);
            let base = expected + confidence;
            let bonus = diversity::diversity_bonus(&product, profile);
            Some(ScoredCandidate {
                product,
                base_score: base,
                expected_reward: expected,
                confidence,
                diversity_bonus: bonus,
                exploration_bonus: exploration,
                final_score: base + bonus + exploration,
            })
        })
        .collect()
}

fn into_item(candidate: ScoredCandidate, session: &UserSession) -> RecommendedItem {
    let reasoning = build_reasoning(&candidate, session);
    RecommendedItem {
        product: candidate.product,
        confidence_score: candidate.final_score,
        base_score: candidate.base_score,
        expected_reward: candidate.expected_reward,
        diversity_bonus: candidate.diversity_bonus,
        exploration_bonus: candidate.exploration_bonus,
        algorithm: "LinUCB",
        reasoning,
    }
}

fn build_reasoning(candidate: &ScoredCandidate, session: &UserSession) -> String {
    if session.total_interactions == 0 {
        return "Exploring your style preferences - rate this item to help us learn".to_string();
    }
    let mut parts = Vec::new();
    if candidate.expected_reward > candidate.confidence {
        parts.push("matches preferences learned from your feedback");
    } else {
        parts.push("worth exploring based on what we know so far");
    }
    if candidate.diversity_bonus > 0.0 {
        parts.push("adds variety to what you've seen");
    }
    let mut reasoning = parts.join(" and ");
    if let Some(first) = reasoning.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    reasoning
}

fn shape_response(set: RecommendationSet, single: bool) -> serde_json::Value {
    let mut body = serde_json::json!({
        "success": true,
        "user_stats": set.user_stats,
        "diversity_info": set.diversity_info,
        "filters_applied": set.filters_applied,
    });
    if single {
        body["recommendation"] = serde_json::to_value(&set.items[0]).unwrap_or_default();
    } else {
        body["recommendations"] = serde_json::to_value(&set.items).unwrap_or_default();
        body["count"] = serde_json::json!(set.items.len());
        body["partial"] = serde_json::json!(set.partial);
    }
    body
}

/// Re-exported for the feedback path's diversity stats.
pub fn profile_summary(profile: &UserProfile, rules: &AvoidanceRules) -> serde_json::Value {
    serde_json::json!({
        "categories_seen": profile.seen_categories.len(),
        "colors_seen": profile.seen_colors.len(),
        "brands_seen": profile.seen_brands.len(),
        "loved_products": profile.loved_count,
        "avoidance_active": !rules.is_empty(),
        "avoided_categories": rules.categories,
        "avoided_colors": rules.colors,
        "avoided_brands": rules.brands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::LinUcbModel;
    use crate::models::FEATURE_DIMENSIONS;
    use chrono::Utc;

    fn session(interactions: i32) -> UserSession {
        UserSession {
            session_id: Uuid::new_v4(),
            user_id: "u1".into(),
            alpha: 1.0,
            dimensions: FEATURE_DIMENSIONS as i32,
            total_interactions: interactions,
            status: "active".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn product(id: &str, valid: bool) -> Product {
        let mut vector = vec![0.0; FEATURE_DIMENSIONS];
        if valid {
            vector[0] = 1.0;
        }
        Product {
            product_id: id.to_string(),
            name: id.to_string(),
            brand: "acme".into(),
            category_main: "tops".into(),
            primary_color: "black".into(),
            price: 20.0,
            occasion: None,
            season: None,
            style: None,
            image_url: None,
            description: None,
            feature_vector: vector,
        }
    }

    #[test]
    fn invalid_vectors_are_dropped_from_scoring() {
        let model = LinUcbModel::new(1.0, FEATURE_DIMENSIONS);
        let snapshot = model.snapshot().unwrap();
        let scored = score_candidates(
            vec![product("ok", true), product("broken", false)],
            &snapshot,
            &UserProfile::default(),
            0,
        );
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].product.product_id, "ok");
    }

    #[test]
    fn final_score_is_base_plus_bonuses() {
        let model = LinUcbModel::new(1.0, FEATURE_DIMENSIONS);
        let snapshot = model.snapshot().unwrap();
        let scored = score_candidates(
            vec![product("ok", true)],
            &snapshot,
            &UserProfile::default(),
            0,
        );
        let c = &scored[0];
        assert!((c.final_score - (c.base_score + c.diversity_bonus + c.exploration_bonus)).abs() < 1e-12);
        assert!((c.exploration_bonus - 0.30).abs() < 1e-12);
        // Unseen category, color and brand all contribute.
        assert!((c.diversity_bonus - 0.45).abs() < 1e-12);
    }

    #[test]
    fn cold_session_reasoning_is_exploratory() {
        let model = LinUcbModel::new(1.0, FEATURE_DIMENSIONS);
        let snapshot = model.snapshot().unwrap();
        let scored = score_candidates(
            vec![product("ok", true)],
            &snapshot,
            &UserProfile::default(),
            0,
        );
        let reasoning = build_reasoning(&scored[0], &session(0));
        assert!(reasoning.to_lowercase().contains("exploring"));

        let warm = build_reasoning(&scored[0], &session(5));
        assert!(!warm.to_lowercase().contains("exploring your style"));
    }
}
