//! Write-once interaction log. The timestamp-ordered stream per session is
//! the authoritative input for model reconstruction.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Interaction, UserAction};

const INTERACTION_COLUMNS: &str = "id, session_id, product_id, action, reward, feature_vector, score_before, score_after, timestamp";

/// Fields of an interaction row before it has been assigned an id.
pub struct NewInteraction<'a> {
    pub session_id: Uuid,
    pub product_id: &'a str,
    pub action: UserAction,
    pub reward: f64,
    pub feature_vector: &'a [f64],
    pub score_before: f64,
    pub score_after: f64,
}

pub struct InteractionLog {
    pool: PgPool,
}

impl InteractionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one interaction inside the feedback transaction.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        interaction: NewInteraction<'_>,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO interactions \
             (session_id, product_id, action, reward, feature_vector, score_before, score_after) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(interaction.session_id)
        .bind(interaction.product_id)
        .bind(interaction.action.as_str())
        .bind(interaction.reward)
        .bind(interaction.feature_vector)
        .bind(interaction.score_before)
        .bind(interaction.score_after)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// The full reward stream for a session in replay order.
    pub async fn for_session(&self, session_id: Uuid) -> AppResult<Vec<Interaction>> {
        let interactions = sqlx::query_as::<_, Interaction>(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions WHERE session_id = $1 \
             ORDER BY timestamp ASC, id ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(interactions)
    }
}
