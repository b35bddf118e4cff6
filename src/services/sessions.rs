//! Session records: creation, lookup, and the feedback-path counters.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::UserSession;

const SESSION_COLUMNS: &str = "session_id, user_id, alpha, dimensions, total_interactions, status, created_at, updated_at";

pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: &str,
        alpha: f64,
        dimensions: usize,
    ) -> AppResult<UserSession> {
        let session_id = Uuid::new_v4();
        let session = sqlx::query_as::<_, UserSession>(&format!(
            "INSERT INTO user_sessions (session_id, user_id, alpha, dimensions, total_interactions, status) \
             VALUES ($1, $2, $3, $4, 0, 'active') RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id)
        .bind(user_id)
        .bind(alpha)
        .bind(dimensions as i32)
        .fetch_one(&self.pool)
        .await?;

        info!(session_id = %session.session_id, user_id = %user_id, "session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> AppResult<Option<UserSession>> {
        let session = sqlx::query_as::<_, UserSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Bump the interaction counter and touch `updated_at` inside the
    /// feedback transaction. Returns the new total.
    pub async fn increment_interactions(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
    ) -> AppResult<i32> {
        let row = sqlx::query(
            "UPDATE user_sessions SET total_interactions = total_interactions + 1, updated_at = $2 \
             WHERE session_id = $1 RETURNING total_interactions",
        )
        .bind(session_id)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.try_get("total_interactions")?)
    }

    pub async fn count_active(&self) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM user_sessions WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
