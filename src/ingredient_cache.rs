//! # Ingredient Cache Module
//!
//! Decides, for a (dish name, serving count) request, whether a stored
//! ingredient list can be reused or the generator must be called, and keeps
//! the stored list's confirmation counter honest.
//!
//! ## Trust
//!
//! A generated list is not trusted on its own. Every new generation whose
//! ingredient names match the stored list adds one confirmation; a mismatch
//! replaces the list and starts over at one. Once an entry reaches the
//! configured number of confirmations it is served without calling the
//! generator. Age never makes an entry trusted.
//!
//! Concurrent resolutions of the same key are not serialized: both may call
//! the generator and the last cache write wins.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::generator::IngredientGenerator;
use crate::planning_errors::{PlanningError, PlanningResult};
use crate::planning_model::{GeneratedIngredient, IngredientCacheEntry};
use crate::store::CacheRepo;

/// What happened to the cache while resolving a request
#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    /// First usable generation for the key
    Created,
    /// Generation agreed with the stored list
    Confirmed { confirmations: i32 },
    /// Generation disagreed; the stored list was replaced
    Replaced,
    /// Too few ingredients to take part in confirmation
    SkippedLowQuality,
}

/// Where a resolved ingredient list came from
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionSource {
    /// Trusted cache entry, no generator call
    Cached { confirmations: i32 },
    /// Fresh generation and its effect on the cache
    Generated(CacheUpdate),
}

/// Result of [`IngredientCache::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub dish_key: String,
    pub ingredients: Vec<GeneratedIngredient>,
    pub source: ResolutionSource,
}

/// Canonical cache key for a dish name
///
/// Lowercases, trims and collapses runs of whitespace into single spaces.
///
/// ```rust
/// use mealplan::ingredient_cache::normalize_dish_key;
///
/// assert_eq!(normalize_dish_key("  Tarte   Tatin  "), "tarte tatin");
/// ```
pub fn normalize_dish_key(dish_name: &str) -> String {
    dish_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Ingredient names compared case-insensitively and without regard to order
pub fn ingredient_name_set(ingredients: &[GeneratedIngredient]) -> BTreeSet<String> {
    ingredients
        .iter()
        .map(|ingredient| ingredient.name.trim().to_lowercase())
        .collect()
}

/// Confirmation-based cache in front of the ingredient generator
#[derive(Clone)]
pub struct IngredientCache {
    store: Arc<dyn CacheRepo>,
    generator: Arc<dyn IngredientGenerator>,
    config: CacheConfig,
}

impl IngredientCache {
    pub fn new(
        store: Arc<dyn CacheRepo>,
        generator: Arc<dyn IngredientGenerator>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    /// Resolve the ingredient list for a dish and serving count
    ///
    /// Serving counts are part of the key; a list cached for 4 people is never
    /// rescaled for 6.
    pub async fn resolve(&self, dish_name: &str, serving_count: i32) -> PlanningResult<Resolution> {
        let dish_key = normalize_dish_key(dish_name);
        if dish_key.is_empty() {
            return Err(PlanningError::InvalidInput("dish name is empty".to_string()));
        }
        if serving_count < 1 {
            return Err(PlanningError::InvalidInput(format!(
                "serving count must be positive, got {serving_count}"
            )));
        }

        let existing = self.store.find_cache_entry(&dish_key, serving_count).await?;

        if let Some(entry) = &existing {
            if entry.is_trusted(self.config.min_confirmations) {
                debug!(
                    dish_key = %dish_key,
                    serving_count,
                    confirmations = entry.confirmations,
                    "Serving trusted cache entry"
                );
                return Ok(Resolution {
                    dish_key,
                    ingredients: entry.ingredients.clone(),
                    source: ResolutionSource::Cached {
                        confirmations: entry.confirmations,
                    },
                });
            }
        }

        let generated = self.generate(dish_name, serving_count).await?;

        if generated.len() < self.config.min_cacheable_ingredients {
            info!(
                dish_key = %dish_key,
                serving_count,
                count = generated.len(),
                "Generated list too short to cache"
            );
            return Ok(Resolution {
                dish_key,
                ingredients: generated,
                source: ResolutionSource::Generated(CacheUpdate::SkippedLowQuality),
            });
        }

        let (entry, update) = match existing {
            None => (
                IngredientCacheEntry::new(&dish_key, serving_count, generated),
                CacheUpdate::Created,
            ),
            Some(mut entry) => {
                if ingredient_name_set(&entry.ingredients) == ingredient_name_set(&generated) {
                    entry.confirmations += 1;
                    entry.updated_at = Utc::now();
                    let confirmations = entry.confirmations;
                    (entry, CacheUpdate::Confirmed { confirmations })
                } else {
                    entry.ingredients = generated;
                    entry.confirmations = 1;
                    entry.updated_at = Utc::now();
                    (entry, CacheUpdate::Replaced)
                }
            }
        };

        self.store.upsert_cache_entry(&entry).await?;
        info!(
            dish_key = %dish_key,
            serving_count,
            confirmations = entry.confirmations,
            update = ?update,
            "Updated ingredient cache"
        );

        Ok(Resolution {
            dish_key,
            ingredients: entry.ingredients,
            source: ResolutionSource::Generated(update),
        })
    }

    /// Call the generator and keep only ingredients with a name
    async fn generate(
        &self,
        dish_name: &str,
        serving_count: i32,
    ) -> PlanningResult<Vec<GeneratedIngredient>> {
        let raw = self
            .generator
            .generate(dish_name, serving_count)
            .await
            .map_err(|e| {
                warn!(error = %e, dish_name, serving_count, "Ingredient generator failed");
                PlanningError::GenerationFailed(e.to_string())
            })?;

        let usable: Vec<GeneratedIngredient> = raw
            .into_iter()
            .filter_map(|mut ingredient| {
                let name = ingredient.name.trim();
                if name.is_empty() {
                    return None;
                }
                ingredient.name = name.to_string();
                Some(ingredient)
            })
            .collect();

        if usable.is_empty() {
            warn!(dish_name, serving_count, "Ingredient generator returned no ingredients");
            return Err(PlanningError::GenerationFailed(format!(
                "no ingredients generated for '{dish_name}'"
            )));
        }

        Ok(usable)
    }
}
