//! Feedback processing: fold one user action into the session's model and
//! logs, with the history update and interaction append committed atomically.
//!
//! The mutation runs on a spawned task so a client disconnect can never
//! abandon the write pair halfway; the transaction makes the pair all-or-
//! nothing even against process failure.

use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::bandit::{RewardMap, UserInsights};
use crate::cache::RecommendationCache;
use crate::error::{AppError, AppResult};
use crate::features;
use crate::models::{UserAction, HISTORY_RETENTION};
use crate::services::catalog::CatalogService;
use crate::services::diversity;
use crate::services::history::HistoryStore;
use crate::services::interactions::{InteractionLog, NewInteraction};
use crate::services::locks::SessionLocks;
use crate::services::model_cache::ModelCache;
use crate::services::recommender;
use crate::services::sessions::SessionStore;

pub struct FeedbackService {
    pool: PgPool,
    catalog: Arc<CatalogService>,
    history: Arc<HistoryStore>,
    sessions: Arc<SessionStore>,
    interactions: Arc<InteractionLog>,
    cache: Arc<RecommendationCache>,
    locks: Arc<SessionLocks>,
    models: Arc<ModelCache>,
    rewards: RewardMap,
}

impl FeedbackService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        catalog: Arc<CatalogService>,
        history: Arc<HistoryStore>,
        sessions: Arc<SessionStore>,
        interactions: Arc<InteractionLog>,
        cache: Arc<RecommendationCache>,
        locks: Arc<SessionLocks>,
        models: Arc<ModelCache>,
        rewards: RewardMap,
    ) -> Self {
        Self {
            pool,
            catalog,
            history,
            sessions,
            interactions,
            cache,
            locks,
            models,
            rewards,
        }
    }

    pub fn rewards(&self) -> &RewardMap {
        &self.rewards
    }

    /// Process one feedback event. The inner future is spawned so the writes
    /// survive a client disconnect mid-request.
    pub async fn process(
        self: &Arc<Self>,
        session_id: Uuid,
        product_id: String,
        action: UserAction,
        context: Option<serde_json::Value>,
    ) -> AppResult<serde_json::Value> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service
                .process_inner(session_id, product_id, action, context)
                .await
        })
        .await
        .map_err(|e| AppError::Internal(format!("feedback task failed: {e}")))?
    }

    async fn process_inner(
        &self,
        session_id: Uuid,
        product_id: String,
        action: UserAction,
        _context: Option<serde_json::Value>,
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

        let product = self
            .catalog
            .get_product(&product_id)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(product_id.clone()))?;

        let x = features::extract(&product);
        if !features::is_valid(&x) {
            return Err(AppError::validation(format!(
                "product {product_id} has an invalid feature vector"
            )));
        }

        // Model state as of the current stream, then the score evolution for
        // this exact feature vector.
        let stream = self.interactions.for_session(session_id).await?;
        let mut model = self.models.get_or_replay(&session, &stream)?;
        let score_before = model.ucb(&x)?;
        let reward = self.rewards.reward_for(action);
        model.update(&x, reward)?;
        let score_after = model.ucb(&x)?;

        // History update and interaction append commit together or not at all.
        let mut tx = self.pool.begin().await?;
        self.history
            .set_action(&mut tx, session_id, &product_id, action)
            .await?;
        self.interactions
            .append(
                &mut tx,
                NewInteraction {
                    session_id,
                    product_id: &product_id,
                    action,
                    reward,
                    feature_vector: &x,
                    score_before,
                    score_after,
                },
            )
            .await?;
        let total_interactions = self
            .sessions
            .increment_interactions(&mut tx, session_id)
            .await?;
        tx.commit().await?;

        self.models
            .store(session_id, model.clone(), stream.len() + 1);
        self.cache.invalidate_session(session_id);

        info!(
            session_id = %session_id,
            product_id = %product_id,
            action = %action,
            reward,
            total_interactions,
            "feedback processed"
        );

        let history = self
            .history
            .get_history(session_id, HISTORY_RETENTION)
            .await?;
        let seen_ids: Vec<String> = history.iter().map(|e| e.product_id.clone()).collect();
        let seen_products = self.catalog.get_products_by_ids(&seen_ids).await?;
        let profile = diversity::build_profile(&history, &seen_products);
        let rules = diversity::avoidance_rules(&history, &seen_products);

        let insights = UserInsights::from_model(&model, 3);

        Ok(json!({
            "success": true,
            "learning_update": {
                "action": action.as_str(),
                "reward": reward,
                "total_interactions": total_interactions,
                "current_alpha": model.alpha(),
                "algorithm": "LinUCB",
            },
            "user_insights": insights,
            "diversity_stats": recommender::profile_summary(&profile, &rules),
            "score_evolution": {
                "score_before": score_before,
                "score_after": score_after,
                "change": score_after - score_before,
            },
        }))
    }
}
