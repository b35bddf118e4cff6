use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Length of every product feature vector.
pub const FEATURE_DIMENSIONS: usize = 26;

/// Maximum history entries retained per session; oldest are purged on insert.
pub const HISTORY_RETENTION: i64 = 100;

/// End-user reaction to a shown product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    Love,
    Like,
    Dislike,
    Skip,
    Neutral,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Love => "love",
            UserAction::Like => "like",
            UserAction::Dislike => "dislike",
            UserAction::Skip => "skip",
            UserAction::Neutral => "neutral",
        }
    }

    /// Strict parse over the action vocabulary.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "love" => Some(UserAction::Love),
            "like" => Some(UserAction::Like),
            "dislike" => Some(UserAction::Dislike),
            "skip" => Some(UserAction::Skip),
            "neutral" => Some(UserAction::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog product. Immutable after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub brand: String,
    pub category_main: String,
    pub primary_color: String,
    pub price: f64,
    pub occasion: Option<String>,
    pub season: Option<String>,
    pub style: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub feature_vector: Vec<f64>,
}

/// Per-session bandit configuration and counters.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub alpha: f64,
    pub dimensions: i32,
    pub total_interactions: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSession {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// One row of the append-only shown-products log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionHistoryEntry {
    pub id: i64,
    pub session_id: Uuid,
    pub product_id: String,
    pub shown_at: DateTime<Utc>,
    pub user_action: Option<String>,
    pub action_timestamp: Option<DateTime<Utc>>,
}

impl SessionHistoryEntry {
    /// Parsed action, None when the entry was never acted on.
    pub fn action(&self) -> Option<UserAction> {
        self.user_action.as_deref().and_then(UserAction::parse)
    }
}

/// Write-once reward event. The timestamp-ordered stream per session is the
/// authoritative input for model reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Interaction {
    pub id: i64,
    pub session_id: Uuid,
    pub product_id: String,
    pub action: String,
    pub reward: f64,
    pub feature_vector: Vec<f64>,
    pub score_before: f64,
    pub score_after: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_vocabulary_is_strict() {
        assert_eq!(UserAction::parse("love"), Some(UserAction::Love));
        assert_eq!(UserAction::parse(" LIKE "), Some(UserAction::Like));
        assert_eq!(UserAction::parse("meh"), None);
        assert_eq!(UserAction::parse(""), None);
    }

    #[test]
    fn action_round_trips_through_str() {
        for action in [
            UserAction::Love,
            UserAction::Like,
            UserAction::Dislike,
            UserAction::Skip,
            UserAction::Neutral,
        ] {
            assert_eq!(UserAction::parse(action.as_str()), Some(action));
        }
    }
}
