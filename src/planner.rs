//! # Planner Module
//!
//! Entry point for the action layer. Wires a store and an ingredient
//! generator into the ordering, ingredient cache and shopping list
//! components. Callers are expected to have authorized the request already.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::generator::IngredientGenerator;
use crate::ingredient_cache::{IngredientCache, ResolutionSource};
use crate::ordering::OrderMaintainer;
use crate::planning_errors::{PlanningError, PlanningResult};
use crate::planning_model::{Ingredient, Item, NewItem, SourceRef};
use crate::shopping_list::{build_shopping_list, AggregatedShoppingItem, CategoryGroup};
use crate::store::{IngredientRepo, ItemRepo, PlanningStore, ShoppingRepo};

/// Planning and shopping consolidation facade
#[derive(Clone)]
pub struct Planner {
    items: Arc<dyn ItemRepo>,
    ingredients: Arc<dyn IngredientRepo>,
    shopping: Arc<dyn ShoppingRepo>,
    ordering: OrderMaintainer,
    cache: IngredientCache,
}

impl Planner {
    pub fn new<S>(store: Arc<S>, generator: Arc<dyn IngredientGenerator>, cache_config: CacheConfig) -> Self
    where
        S: PlanningStore + 'static,
    {
        let items: Arc<dyn ItemRepo> = store.clone();
        Self {
            ordering: OrderMaintainer::new(items.clone()),
            cache: IngredientCache::new(store.clone(), generator, cache_config),
            items,
            ingredients: store.clone(),
            shopping: store,
        }
    }

    /// Move an item to another position or service
    pub async fn move_item(
        &self,
        item_id: i64,
        target_service_id: i64,
        target_order: Option<i32>,
    ) -> PlanningResult<()> {
        self.ordering
            .move_item(item_id, target_service_id, target_order)
            .await
    }

    /// Renumber a service in the given order
    pub async fn reorder_items(&self, service_id: i64, ordered_item_ids: &[i64]) -> PlanningResult<()> {
        self.ordering.reorder(service_id, ordered_item_ids).await
    }

    /// Add an item at the end of a service
    pub async fn add_item(&self, service_id: i64, item: &NewItem) -> PlanningResult<Item> {
        self.ordering.append_item(service_id, item).await
    }

    /// Delete an item, keeping its service densely ordered
    pub async fn remove_item(&self, item_id: i64) -> PlanningResult<()> {
        self.ordering.remove_item(item_id).await
    }

    /// Resolve the ingredients of a dish and store them under the item
    ///
    /// Any previous ingredients of the item are replaced.
    pub async fn resolve_ingredients(
        &self,
        item_id: i64,
        dish_name: &str,
        serving_count: i32,
    ) -> PlanningResult<Vec<Ingredient>> {
        if self.items.find_item(item_id).await?.is_none() {
            return Err(PlanningError::NotFound(format!("item {item_id}")));
        }

        let resolution = self.cache.resolve(dish_name, serving_count).await?;
        let stored = self
            .ingredients
            .replace_item_ingredients(item_id, &resolution.ingredients)
            .await?;

        match &resolution.source {
            ResolutionSource::Cached { confirmations } => info!(
                item_id,
                dish_key = %resolution.dish_key,
                confirmations,
                "Ingredients served from cache"
            ),
            ResolutionSource::Generated(update) => info!(
                item_id,
                dish_key = %resolution.dish_key,
                update = ?update,
                "Ingredients generated"
            ),
        }

        Ok(stored)
    }

    /// Grouped shopping list of everything assigned to a person
    pub async fn build_shopping_list(&self, person_id: i64) -> PlanningResult<Vec<CategoryGroup>> {
        let planned = self.shopping.list_person_items(person_id).await?;
        let groups = build_shopping_list(&planned);

        debug!(person_id, items = planned.len(), categories = groups.len(), "Built shopping list");
        Ok(groups)
    }

    /// Check or uncheck a single ingredient or item
    pub async fn set_source_checked(&self, source: SourceRef, checked: bool) -> PlanningResult<()> {
        self.ingredients.set_checked(&[source], checked).await
    }

    /// Check or uncheck every source behind a merged shopping line
    pub async fn set_aggregated_checked(
        &self,
        line: &AggregatedShoppingItem,
        checked: bool,
    ) -> PlanningResult<()> {
        let sources = line.source_refs();
        self.ingredients.set_checked(&sources, checked).await?;

        debug!(name = %line.name, sources = sources.len(), checked, "Updated merged line");
        Ok(())
    }
}
