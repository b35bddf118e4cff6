//! Append-only log of products shown per session, capped at the retention
//! limit. Newest-first reads feed the diversity controller.

use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{SessionHistoryEntry, UserAction, HISTORY_RETENTION};

const HISTORY_COLUMNS: &str =
    "id, session_id, product_id, shown_at, user_action, action_timestamp";

pub struct HistoryStore {
    pool: PgPool,
}

impl HistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a shown-product entry, then purge any overflow beyond the
    /// retention cap. Runs under the session writer lock, so the two
    /// statements cannot interleave with another writer for this session.
    pub async fn record_shown(&self, session_id: Uuid, product_id: &str) -> AppResult<()> {
        sqlx::query("INSERT INTO session_history (session_id, product_id) VALUES ($1, $2)")
            .bind(session_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        let purged = sqlx::query(
            "DELETE FROM session_history WHERE session_id = $1 AND id NOT IN ( \
                 SELECT id FROM session_history WHERE session_id = $1 \
                 ORDER BY shown_at DESC, id DESC LIMIT $2)",
        )
        .bind(session_id)
        .bind(HISTORY_RETENTION)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if purged > 0 {
            debug!(session_id = %session_id, purged, "history retention purge");
        }
        Ok(())
    }

    /// Record the user's action against the most recent matching history
    /// entry. A missing entry is a warning, not an error: feedback may refer
    /// to a product shown before the retention horizon.
    pub async fn set_action(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        product_id: &str,
        action: UserAction,
    ) -> AppResult<()> {
        let updated = sqlx::query(
            "UPDATE session_history SET user_action = $3, action_timestamp = now() \
             WHERE id = ( \
                 SELECT id FROM session_history \
                 WHERE session_id = $1 AND product_id = $2 \
                 ORDER BY shown_at DESC, id DESC LIMIT 1)",
        )
        .bind(session_id)
        .bind(product_id)
        .bind(action.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if updated == 0 {
            warn!(
                session_id = %session_id,
                product_id = %product_id,
                "no history entry to attach action to"
            );
        }
        Ok(())
    }

    /// Entries newest first, up to `limit`.
    pub async fn get_history(
        &self,
        session_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<SessionHistoryEntry>> {
        let entries = sqlx::query_as::<_, SessionHistoryEntry>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM session_history WHERE session_id = $1 \
             ORDER BY shown_at DESC, id DESC LIMIT $2"
        ))
        .bind(session_id)
        .bind(limit.min(HISTORY_RETENTION))
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn count(&self, session_id: Uuid) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM session_history WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
