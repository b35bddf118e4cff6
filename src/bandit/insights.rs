//! Derived user insights: the strongest learned preferences and a coarse
//! confidence tier for how much the model should be trusted.

use serde::Serialize;

use super::LinUcbModel;
use crate::features;

/// How trustworthy the learned preference vector is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceTier {
    pub fn from_model(interactions: u32, theta_norm: f64) -> Self {
        if interactions >= 20 && theta_norm > 1.0 {
            ConfidenceTier::VeryHigh
        } else if interactions >= 10 && theta_norm > 0.5 {
            ConfidenceTier::High
        } else if interactions >= 5 && theta_norm > 0.3 {
            ConfidenceTier::Medium
        } else if interactions >= 3 {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::VeryLow
        }
    }
}

/// One θ component mapped back to its slot name.
#[derive(Debug, Clone, Serialize)]
pub struct PreferenceInsight {
    pub feature: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInsights {
    pub top_preferences: Vec<PreferenceInsight>,
    pub top_dislikes: Vec<PreferenceInsight>,
    pub confidence: ConfidenceTier,
    pub interactions_observed: u32,
    pub preference_strength: f64,
}

impl UserInsights {
    /// Top-k positive and negative θ components, mapped to slot names.
    pub fn from_model(model: &LinUcbModel, k: usize) -> Self {
        let mut weighted: Vec<(usize, f64)> = model
            .theta()
            .iter()
            .enumerate()
            .map(|(i, w)| (i, *w))
            .collect();
        weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let top_preferences = weighted
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .take(k)
            .map(|(i, w)| PreferenceInsight {
                feature: features::slot_name(*i),
                weight: *w,
            })
            .collect();

        let top_dislikes = weighted
            .iter()
            .rev()
            .filter(|(_, w)| *w < 0.0)
            .take(k)
            .map(|(i, w)| PreferenceInsight {
                feature: features::slot_name(*i),
                weight: *w,
            })
            .collect();

        let theta_norm = model.theta_norm();
        Self {
            top_preferences,
            top_dislikes,
            confidence: ConfidenceTier::from_model(model.interactions(), theta_norm),
            interactions_observed: model.interactions(),
            preference_strength: theta_norm,
        }
    }
}
