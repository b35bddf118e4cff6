//! Diversity control: exclusion window, avoidance rules, diversity and
//! exploration bonuses, and the stochastic top-K pick.
//!
//! The stochastic pick is deliberate: when the cache is bypassed, two
//! identical requests may still return different (equally good) products.

use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::{Product, SessionHistoryEntry, UserAction};

/// Number of most recently shown products forbidden as candidates.
pub const EXCLUSION_WINDOW: usize = 20;

/// How many recent entries the avoidance scan examines.
pub const RECENT_LOVED_WINDOW: usize = 10;

/// Loved-facet counts at which a value becomes temporarily avoided.
pub const CATEGORY_AVOID_LIMIT: usize = 3;
pub const COLOR_AVOID_LIMIT: usize = 2;
pub const BRAND_AVOID_LIMIT: usize = 3;

pub const CATEGORY_DIVERSITY_BONUS: f64 = 0.20;
pub const COLOR_DIVERSITY_BONUS: f64 = 0.15;
pub const BRAND_DIVERSITY_BONUS: f64 = 0.10;

pub const EXPLORATION_BONUS_BASE: f64 = 0.30;
pub const EXPLORATION_BONUS_FLOOR: f64 = 0.05;
pub const EXPLORATION_BONUS_DECAY: f64 = 0.01;

/// How many top-scored candidates the uniform pick draws from.
pub const TOP_K: usize = 5;

/// Facet values the user has already been shown, plus the loved subset used
/// for avoidance.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub seen_categories: HashSet<String>,
    pub seen_colors: HashSet<String>,
    pub seen_brands: HashSet<String>,
    pub loved_count: usize,
}

/// Facet values temporarily blocked from the candidate query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AvoidanceRules {
    pub categories: Vec<String>,
    pub colors: Vec<String>,
    pub brands: Vec<String>,
}

impl AvoidanceRules {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.colors.is_empty() && self.brands.is_empty()
    }
}

/// A candidate with its full score decomposition.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub product: Product,
    pub base_score: f64,
    pub expected_reward: f64,
    pub confidence: f64,
    pub diversity_bonus: f64,
    pub exploration_bonus: f64,
    pub final_score: f64,
}

/// Product ids of the most recently shown window; candidates must avoid them.
pub fn exclusion_set(history: &[SessionHistoryEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    history
        .iter()
        .take(EXCLUSION_WINDOW)
        .filter(|entry| seen.insert(entry.product_id.clone()))
        .map(|entry| entry.product_id.clone())
        .collect()
}

/// Derive avoidance rules from the loved subset of the most recent entries.
/// History is newest first; `products` resolves ids to facets.
pub fn avoidance_rules(
    history: &[SessionHistoryEntry],
    products: &HashMap<String, Product>,
) -> AvoidanceRules {
    let mut categories: HashMap<&str, usize> = HashMap::new();
    let mut colors: HashMap<&str, usize> = HashMap::new();
    let mut brands: HashMap<&str, usize> = HashMap::new();

    for entry in history.iter().take(RECENT_LOVED_WINDOW) {
        if entry.action() != Some(UserAction::Love) {
            continue;
        }
        if let Some(product) = products.get(&entry.product_id) {
            *categories.entry(product.category_main.as_str()).or_default() += 1;
            *colors.entry(product.primary_color.as_str()).or_default() += 1;
            *brands.entry(product.brand.as_str()).or_default() += 1;
        }
    }

    let over = |counts: HashMap<&str, usize>, limit: usize| -> Vec<String> {
        let mut values: Vec<String> = counts
            .into_iter()
            .filter(|(_, n)| *n >= limit)
            .map(|(v, _)| v.to_string())
            .collect();
        values.sort_unstable();
        values
    };

    AvoidanceRules {
        categories: over(categories, CATEGORY_AVOID_LIMIT),
        colors: over(colors, COLOR_AVOID_LIMIT),
        brands: over(brands, BRAND_AVOID_LIMIT),
    }
}

/// Snapshot of everything the user has seen, for the diversity bonus.
pub fn build_profile(
    history: &[SessionHistoryEntry],
    products: &HashMap<String, Product>,
) -> UserProfile {
    let mut profile = UserProfile::default();
    for entry in history {
        if let Some(product) = products.get(&entry.product_id) {
            profile.seen_categories.insert(product.category_main.clone());
            profile.seen_colors.insert(product.primary_color.clone());
            profile.seen_brands.insert(product.brand.clone());
        }
        if entry.action() == Some(UserAction::Love) {
            profile.loved_count += 1;
        }
    }
    profile
}

/// Bonus for facets the user has not seen yet in this session.
pub fn diversity_bonus(product: &Product, profile: &UserProfile) -> f64 {
    let mut bonus = 0.0;
    if !profile.seen_categories.contains(&product.category_main) {
        bonus += CATEGORY_DIVERSITY_BONUS;
    }
    if !profile.seen_colors.contains(&product.primary_color) {
        bonus += COLOR_DIVERSITY_BONUS;
    }
    if !profile.seen_brands.contains(&product.brand) {
        bonus += BRAND_DIVERSITY_BONUS;
    }
    bonus
}

/// Exploration incentive that decays with observed interactions.
pub fn exploration_bonus(total_interactions: i32) -> f64 {
    (EXPLORATION_BONUS_BASE - EXPLORATION_BONUS_DECAY * total_interactions as f64)
        .max(EXPLORATION_BONUS_FLOOR)
}

/// Sort by final score and uniformly pick `count` distinct candidates, each
/// drawn from the top K of whatever remains.
pub fn select_top_k<R: Rng>(
    mut candidates: Vec<ScoredCandidate>,
    count: usize,
    rng: &mut R,
) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected = Vec::with_capacity(count.min(candidates.len()));
    while selected.len() < count && !candidates.is_empty() {
        let pool = TOP_K.min(candidates.len());
        let pick = rng.gen_range(0..pool);
        selected.push(candidates.remove(pick));
    }
    selected
}
