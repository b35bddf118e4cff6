//! Per-session snapshot of the fitted LinUCB state.
//!
//! The authoritative model is always what a fresh replay of the session's
//! interaction stream produces; this cache just avoids the O(K·D²) replay on
//! every request. A snapshot is only trusted when its interaction count
//! matches the stream, otherwise the stream is replayed. Entries are mutated
//! exclusively under the session writer lock.

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::bandit::LinUcbModel;
use crate::error::{AppError, AppResult};
use crate::models::{Interaction, UserSession};

struct CachedModel {
    model: LinUcbModel,
    interaction_count: usize,
}

#[derive(Default)]
pub struct ModelCache {
    entries: DashMap<Uuid, CachedModel>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session's model, replaying the interaction stream when no
    /// trusted snapshot exists.
    pub fn get_or_replay(
        &self,
        session: &UserSession,
        interactions: &[Interaction],
    ) -> AppResult<LinUcbModel> {
        if let Some(cached) = self.entries.get(&session.session_id) {
            if cached.interaction_count == interactions.len() {
                return Ok(cached.model.clone());
            }
        }

        debug!(
            session_id = %session.session_id,
            interactions = interactions.len(),
            "replaying interaction stream"
        );
        let model = LinUcbModel::replay(
            session.alpha,
            session.dimensions as usize,
            interactions
                .iter()
                .map(|i| (i.feature_vector.as_slice(), i.reward)),
        )
        .map_err(AppError::from)?;

        self.store(session.session_id, model.clone(), interactions.len());
        Ok(model)
    }

    pub fn store(&self, session_id: Uuid, model: LinUcbModel, interaction_count: usize) {
        self.entries.insert(
            session_id,
            CachedModel {
                model,
                interaction_count,
            },
        );
    }

    pub fn invalidate(&self, session_id: Uuid) {
        self.entries.remove(&session_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
