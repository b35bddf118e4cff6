//! Per-session contextual bandit (LinUCB) and derived user insights.

mod insights;
mod linucb;

pub use insights::{ConfidenceTier, PreferenceInsight, UserInsights};
pub use linucb::{LinUcbModel, ModelError, ModelSnapshot};

use crate::models::UserAction;
use serde::Serialize;

/// Ridge regularization applied to the design matrix.
pub const REGULARIZATION: f64 = 0.01;

/// Exploration coefficient bounds and decay schedule.
pub const ALPHA_MIN: f64 = 0.05;
pub const ALPHA_MAX: f64 = 2.0;
pub const ALPHA_DECAY: f64 = 0.95;

/// Interactions observed before adaptive alpha decay kicks in.
pub const ADAPTIVE_EXPLORATION_AFTER: u32 = 10;

/// Fixed action-to-reward mapping. The `skip` and `neutral` rewards are
/// deployment configuration; they are never switched at runtime.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RewardMap {
    pub love: f64,
    pub like: f64,
    pub neutral: f64,
    pub skip: f64,
    pub dislike: f64,
}

impl Default for RewardMap {
    fn default() -> Self {
        Self {
            love: 2.0,
            like: 1.0,
            neutral: 0.0,
            skip: 0.0,
            dislike: -1.0,
        }
    }
}

impl RewardMap {
    pub fn reward_for(&self, action: UserAction) -> f64 {
        match action {
            UserAction::Love => self.love,
            UserAction::Like => self.like,
            UserAction::Neutral => self.neutral,
            UserAction::Skip => self.skip,
            UserAction::Dislike => self.dislike,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reward_map_matches_contract() {
        let rewards = RewardMap::default();
        assert_eq!(rewards.reward_for(UserAction::Love), 2.0);
        assert_eq!(rewards.reward_for(UserAction::Like), 1.0);
        assert_eq!(rewards.reward_for(UserAction::Neutral), 0.0);
        assert_eq!(rewards.reward_for(UserAction::Skip), 0.0);
        assert_eq!(rewards.reward_for(UserAction::Dislike), -1.0);
    }
}
