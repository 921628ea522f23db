//! # Planning Data Model
//!
//! This module defines the records the planning engine reads and writes:
//! items inside services, the ingredients generated for them, and the shared
//! ingredient cache entries.
//!
//! ## Core Concepts
//!
//! - **Item**: something to bring or buy, ordered densely inside its service
//! - **Ingredient**: a generated component of an item, owned by that item
//! - **IngredientCacheEntry**: a generated list shared by every item with the
//!   same dish and serving count, trusted after repeated agreement
//! - **Category**: shopping aisle of an ingredient, or the "misc" bucket
//!
//! ## Usage
//!
//! ```rust
//! use mealplan::planning_model::{Category, GeneratedIngredient};
//!
//! let flour = GeneratedIngredient::new("farine")
//!     .with_quantity("200g")
//!     .with_category("épicerie");
//!
//! assert_eq!(flour.category(), Category::Categorized("épicerie".to_string()));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// An item belonging to exactly one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub service_id: i64,
    pub name: String,
    /// Free-text quantity as typed by the user (e.g., "2 bouteilles")
    pub quantity: Option<String>,
    pub note: Option<String>,
    pub price: Option<f64>,
    pub assigned_person_id: Option<i64>,
    /// Dense zero-based position inside the service
    #[sqlx(rename = "position")]
    pub order: i32,
    /// Only meaningful while the item owns no ingredients
    pub checked: bool,
}

/// Values for an item that has not been stored yet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewItem {
    pub name: String,
    pub quantity: Option<String>,
    pub note: Option<String>,
    pub price: Option<f64>,
    pub assigned_person_id: Option<i64>,
}

impl NewItem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_quantity(mut self, quantity: &str) -> Self {
        self.quantity = Some(quantity.to_string());
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn assigned_to(mut self, person_id: i64) -> Self {
        self.assigned_person_id = Some(person_id);
        self
    }
}

/// An ingredient owned by an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ingredient {
    pub id: i64,
    pub item_id: i64,
    pub name: String,
    pub quantity: Option<String>,
    pub category: Option<String>,
    #[sqlx(rename = "position")]
    pub order: i32,
    pub checked: bool,
}

/// One ingredient as returned by the generator and stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedIngredient {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub quantity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl GeneratedIngredient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            quantity: None,
            category: None,
        }
    }

    pub fn with_quantity(mut self, quantity: &str) -> Self {
        self.quantity = Some(quantity.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn category(&self) -> Category {
        Category::from_label(self.category.as_deref())
    }
}

/// Accept a quantity written as text or as a bare JSON number
fn deserialize_quantity<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawQuantity {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<RawQuantity>::deserialize(deserializer)?.map(|raw| match raw {
        RawQuantity::Text(text) => text,
        RawQuantity::Number(number) => number.to_string(),
    }))
}

/// A cached ingredient list for one (dish key, serving count) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientCacheEntry {
    /// Normalized dish name
    pub dish_key: String,
    pub serving_count: i32,
    pub ingredients: Vec<GeneratedIngredient>,
    /// Number of independent generations that agreed with the stored list
    pub confirmations: i32,
    pub updated_at: DateTime<Utc>,
}

impl IngredientCacheEntry {
    /// Create a fresh entry seen once
    pub fn new(dish_key: &str, serving_count: i32, ingredients: Vec<GeneratedIngredient>) -> Self {
        Self {
            dish_key: dish_key.to_string(),
            serving_count,
            ingredients,
            confirmations: 1,
            updated_at: Utc::now(),
        }
    }

    pub fn is_trusted(&self, min_confirmations: i32) -> bool {
        self.confirmations >= min_confirmations
    }
}

/// Shopping aisle of an ingredient
///
/// Labels are trimmed and lowercased, so "Crèmerie" and "crèmerie" share a
/// bucket. Ordering puts every categorized bucket first, alphabetically with
/// accents ignored ("épicerie" before "viandes"), and the uncategorized
/// bucket last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Categorized(String),
    /// Manually entered items and ingredients without a category
    Uncategorized,
}

impl Category {
    /// Label shown for the uncategorized bucket
    pub const MISC_LABEL: &'static str = "misc";

    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some(label) if !label.is_empty() => Category::Categorized(label.to_lowercase()),
            _ => Category::Uncategorized,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Category::Categorized(label) => label,
            Category::Uncategorized => Self::MISC_LABEL,
        }
    }
}

/// Lowercased label with combining accents stripped
fn collation_key(label: &str) -> String {
    label
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

impl Ord for Category {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Category::Categorized(a), Category::Categorized(b)) => collation_key(a)
                .cmp(&collation_key(b))
                .then_with(|| a.cmp(b)),
            (Category::Categorized(_), Category::Uncategorized) => Ordering::Less,
            (Category::Uncategorized, Category::Categorized(_)) => Ordering::Greater,
            (Category::Uncategorized, Category::Uncategorized) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Category {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// An item assigned to someone, with its ingredients and where it comes from
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedItem {
    pub item: Item,
    /// Ingredients sorted by their order
    pub ingredients: Vec<Ingredient>,
    pub meal_name: String,
    pub service_name: String,
}

/// A row that can be checked on the shopping list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceRef {
    Ingredient(i64),
    Item(i64),
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Ingredient(id) => write!(f, "ingredient {id}"),
            SourceRef::Item(id) => write!(f, "item {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_label() {
        assert_eq!(
            Category::from_label(Some("  Crèmerie ")),
            Category::Categorized("crèmerie".to_string())
        );
        assert_eq!(
            Category::from_label(Some("CRÈMERIE")),
            Category::from_label(Some("crèmerie"))
        );
        assert_eq!(Category::from_label(Some("   ")), Category::Uncategorized);
        assert_eq!(Category::from_label(None), Category::Uncategorized);
    }

    #[test]
    fn test_uncategorized_sorts_last() {
        let mut categories = vec![
            Category::Uncategorized,
            Category::Categorized("viandes".to_string()),
            Category::Categorized("boulangerie".to_string()),
        ];
        categories.sort();

        assert_eq!(categories[0].label(), "boulangerie");
        assert_eq!(categories[1].label(), "viandes");
        assert_eq!(categories[2], Category::Uncategorized);
        assert_eq!(categories[2].to_string(), "misc");
    }

    #[test]
    fn test_accented_categories_sort_alphabetically() {
        let mut categories = vec![
            Category::from_label(Some("viandes")),
            Category::Uncategorized,
            Category::from_label(Some("Épicerie")),
            Category::from_label(Some("légumes")),
            Category::from_label(Some("crèmerie")),
        ];
        categories.sort();

        let labels: Vec<&str> = categories.iter().map(Category::label).collect();
        assert_eq!(labels, vec!["crèmerie", "épicerie", "légumes", "viandes", "misc"]);
    }

    #[test]
    fn test_cache_entry_trust() {
        let mut entry = IngredientCacheEntry::new("crêpes", 4, Vec::new());
        assert_eq!(entry.confirmations, 1);
        assert!(!entry.is_trusted(3));

        entry.confirmations = 3;
        assert!(entry.is_trusted(3));
    }
}
