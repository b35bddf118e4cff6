//! Product feature extraction.
//!
//! Maps a catalog product onto a fixed-length binary vector with one-hot
//! slots per attribute family. Deterministic, total and idempotent: the same
//! product always yields the same vector, and unknown values fall back to a
//! fixed default slot (or stay all-zero for color/season).

use crate::models::{Product, FEATURE_DIMENSIONS};

pub const CATEGORY_SLOTS: [&str; 5] = ["tops", "bottoms", "dresses", "outerwear", "shoes"];
pub const COLOR_SLOTS: [&str; 8] = [
    "black", "white", "grey", "blue", "red", "green", "brown", "beige",
];
pub const OCCASION_SLOTS: [&str; 4] = ["casual", "formal", "business", "party"];
pub const SEASON_SLOTS: [&str; 4] = ["spring", "summer", "autumn", "winter"];
pub const STYLE_SLOTS: [&str; 5] = ["classic", "trendy", "sporty", "elegant", "minimalist"];

const CATEGORY_OFFSET: usize = 0;
const COLOR_OFFSET: usize = 5;
const OCCASION_OFFSET: usize = 13;
const SEASON_OFFSET: usize = 17;
const STYLE_OFFSET: usize = 21;

const DEFAULT_CATEGORY: &str = "tops";
const DEFAULT_OCCASION: &str = "casual";
const DEFAULT_STYLE: &str = "classic";

/// Lowercase, trim, and fold the synonym table onto the closed vocabulary.
fn canonical(raw: &str) -> String {
    let folded = raw.trim().to_ascii_lowercase();
    match folded.as_str() {
        "gray" => "grey".to_string(),
        "navy" => "blue".to_string(),
        "burgundy" | "maroon" => "red".to_string(),
        "khaki" | "tan" => "beige".to_string(),
        "fall" => "autumn".to_string(),
        "sport" | "sporting" => "sporty".to_string(),
        _ => folded,
    }
}

fn set_slot(vector: &mut [f64], offset: usize, vocab: &[&str], value: &str, default: Option<&str>) {
    let value = canonical(value);
    if let Some(pos) = vocab.iter().position(|v| *v == value) {
        vector[offset + pos] = 1.0;
    } else if let Some(default) = default {
        let pos = vocab
            .iter()
            .position(|v| *v == default)
            .expect("default must be in vocabulary");
        vector[offset + pos] = 1.0;
    }
}

/// Extract the D-dimensional binary feature vector for a product.
pub fn extract(product: &Product) -> Vec<f64> {
    let mut vector = vec![0.0; FEATURE_DIMENSIONS];

    set_slot(
        &mut vector,
        CATEGORY_OFFSET,
        &CATEGORY_SLOTS,
        &product.category_main,
        Some(DEFAULT_CATEGORY),
    );
    set_slot(
        &mut vector,
        COLOR_OFFSET,
        &COLOR_SLOTS,
        &product.primary_color,
        None,
    );
    set_slot(
        &mut vector,
        OCCASION_OFFSET,
        &OCCASION_SLOTS,
        product.occasion.as_deref().unwrap_or(""),
        Some(DEFAULT_OCCASION),
    );
    set_slot(
        &mut vector,
        SEASON_OFFSET,
        &SEASON_SLOTS,
        product.season.as_deref().unwrap_or(""),
        None,
    );
    set_slot(
        &mut vector,
        STYLE_OFFSET,
        &STYLE_SLOTS,
        product.style.as_deref().unwrap_or(""),
        Some(DEFAULT_STYLE),
    );

    vector
}

/// Check the shape invariant: |v| = D, entries in {0,1}, at least one 1.
pub fn is_valid(vector: &[f64]) -> bool {
    vector.len() == FEATURE_DIMENSIONS
        && vector.iter().all(|v| *v == 0.0 || *v == 1.0)
        && vector.iter().any(|v| *v == 1.0)
}

/// Human-readable name for a vector position, e.g. `color:blue`.
pub fn slot_name(index: usize) -> String {
    let (family, vocab, offset) = if index < COLOR_OFFSET {
        ("category", &CATEGORY_SLOTS[..], CATEGORY_OFFSET)
    } else if index < OCCASION_OFFSET {
        ("color", &COLOR_SLOTS[..], COLOR_OFFSET)
    } else if index < SEASON_OFFSET {
        ("occasion", &OCCASION_SLOTS[..], OCCASION_OFFSET)
    } else if index < STYLE_OFFSET {
        ("season", &SEASON_SLOTS[..], SEASON_OFFSET)
    } else {
        ("style", &STYLE_SLOTS[..], STYLE_OFFSET)
    };

    match vocab.get(index - offset) {
        Some(value) => format!("{}:{}", family, value),
        None => format!("feature:{}", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(category: &str, color: &str, occasion: &str, season: &str, style: &str) -> Product {
        Product {
            product_id: "P1".to_string(),
            name: "Test".to_string(),
            brand: "Acme".to_string(),
            category_main: category.to_string(),
            primary_color: color.to_string(),
            price: 49.0,
            occasion: Some(occasion.to_string()),
            season: Some(season.to_string()),
            style: Some(style.to_string()),
            image_url: None,
            description: None,
            feature_vector: Vec::new(),
        }
    }

    #[test]
    fn extracts_one_hot_per_slot_family() {
        let v = extract(&product("Dresses", "Blue", "Party", "Summer", "Elegant"));
        assert!(is_valid(&v));
        assert_eq!(v.iter().sum::<f64>(), 5.0);
        assert_eq!(v[CATEGORY_OFFSET + 2], 1.0); // dresses
        assert_eq!(v[COLOR_OFFSET + 3], 1.0); // blue
        assert_eq!(v[OCCASION_OFFSET + 3], 1.0); // party
        assert_eq!(v[SEASON_OFFSET + 1], 1.0); // summer
        assert_eq!(v[STYLE_OFFSET + 3], 1.0); // elegant
    }

    #[test]
    fn folds_synonyms() {
        let v = extract(&product("Tops", "Gray", "Casual", "Fall", "Sport"));
        assert_eq!(v[COLOR_OFFSET + 2], 1.0); // grey
        assert_eq!(v[SEASON_OFFSET + 2], 1.0); // autumn
        assert_eq!(v[STYLE_OFFSET + 2], 1.0); // sporty

        let navy = extract(&product("Tops", "Navy", "Casual", "Winter", "Classic"));
        assert_eq!(navy[COLOR_OFFSET + 3], 1.0); // blue
    }

    #[test]
    fn unknown_values_use_slot_defaults() {
        let v = extract(&product("Gadgets", "Chartreuse", "Space", "Monsoon", "Baroque"));
        assert!(is_valid(&v));
        assert_eq!(v[CATEGORY_OFFSET], 1.0); // tops default
        assert_eq!(v[OCCASION_OFFSET], 1.0); // casual default
        assert_eq!(v[STYLE_OFFSET], 1.0); // classic default
        // color and season may remain all-zero
        assert!(v[COLOR_OFFSET..OCCASION_OFFSET].iter().all(|x| *x == 0.0));
        assert!(v[SEASON_OFFSET..STYLE_OFFSET].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn extraction_is_deterministic() {
        let p = product("Shoes", "Black", "Business", "Winter", "Minimalist");
        assert_eq!(extract(&p), extract(&p));
    }

    #[test]
    fn slot_names_map_back_to_vocabulary() {
        assert_eq!(slot_name(0), "category:tops");
        assert_eq!(slot_name(7), "color:grey");
        assert_eq!(slot_name(13), "occasion:casual");
        assert_eq!(slot_name(18), "season:summer");
        assert_eq!(slot_name(25), "style:minimalist");
    }
}
