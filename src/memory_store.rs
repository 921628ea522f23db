//! # In-Memory Planning Store
//!
//! A [`PlanningStore`](crate::store::PlanningStore) kept entirely in memory.
//! Used by tests and by callers that do not need persistence.
//!
//! Order batches are applied to a copy of the state and swapped in only when
//! every step succeeded, which gives the same all-or-nothing behaviour as a
//! database transaction.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::planning_errors::{PlanningError, PlanningResult};
use crate::planning_model::{
    GeneratedIngredient, Ingredient, IngredientCacheEntry, Item, NewItem, PlannedItem, SourceRef,
};
use crate::store::{clamp_target, CacheRepo, IngredientRepo, ItemRepo, OrderOp, ShoppingRepo};

#[derive(Debug, Clone)]
struct ServiceRecord {
    meal_name: String,
    name: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    services: BTreeMap<i64, ServiceRecord>,
    items: BTreeMap<i64, Item>,
    ingredients: BTreeMap<i64, Ingredient>,
    cache: HashMap<(String, i32), IngredientCacheEntry>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn item_mut(&mut self, item_id: i64) -> PlanningResult<&mut Item> {
        self.items
            .get_mut(&item_id)
            .ok_or_else(|| PlanningError::NotFound(format!("item {item_id}")))
    }

    fn apply(&mut self, op: &OrderOp) -> PlanningResult<()> {
        match op {
            OrderOp::ExpectMembers {
                service_id,
                item_ids,
            } => {
                let current: HashSet<i64> = self
                    .items
                    .values()
                    .filter(|item| item.service_id == *service_id)
                    .map(|item| item.id)
                    .collect();
                let expected: HashSet<i64> = item_ids.iter().copied().collect();
                if current != expected || expected.len() != item_ids.len() {
                    return Err(PlanningError::Storage(format!(
                        "service {service_id} changed since the request was planned"
                    )));
                }
            }
            OrderOp::ExpectPosition {
                item_id,
                service_id,
                order,
            } => {
                let unchanged = self
                    .items
                    .get(item_id)
                    .is_some_and(|item| item.service_id == *service_id && item.order == *order);
                if !unchanged {
                    return Err(PlanningError::Storage(format!(
                        "item {item_id} changed since the request was planned"
                    )));
                }
            }
            OrderOp::Assign {
                service_id,
                item_id,
                order,
            } => {
                let item = self.item_mut(*item_id)?;
                if item.service_id != *service_id {
                    return Err(PlanningError::Storage(format!(
                        "item {item_id} is not in service {service_id}"
                    )));
                }
                item.order = *order;
            }
            OrderOp::CloseGap { service_id, after } => {
                self.items
                    .values_mut()
                    .filter(|item| item.service_id == *service_id && item.order > *after)
                    .for_each(|item| item.order -= 1);
            }
            OrderOp::Place {
                item_id,
                service_id,
                order,
            } => {
                if !self.services.contains_key(service_id) {
                    return Err(PlanningError::NotFound(format!("service {service_id}")));
                }
                if !self.items.contains_key(item_id) {
                    return Err(PlanningError::NotFound(format!("item {item_id}")));
                }

                let others = self
                    .items
                    .values()
                    .filter(|item| item.service_id == *service_id && item.id != *item_id)
                    .count();
                let slot = clamp_target(*order, others);

                self.items
                    .values_mut()
                    .filter(|item| {
                        item.service_id == *service_id && item.id != *item_id && item.order >= slot
                    })
                    .for_each(|item| item.order += 1);

                let item = self.item_mut(*item_id)?;
                item.service_id = *service_id;
                item.order = slot;
            }
            OrderOp::Remove {
                item_id,
                service_id,
            } => {
                let in_service = self
                    .items
                    .get(item_id)
                    .is_some_and(|item| item.service_id == *service_id);
                if !in_service {
                    return Err(PlanningError::NotFound(format!(
                        "item {item_id} in service {service_id}"
                    )));
                }
                self.items.remove(item_id);
                self.ingredients.retain(|_, ingredient| ingredient.item_id != *item_id);
            }
        }
        Ok(())
    }
}

/// Planning store backed by in-process maps
#[derive(Debug, Default)]
pub struct MemoryPlanningStore {
    state: Mutex<MemoryState>,
}

impl MemoryPlanningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under a meal; returns the service id
    pub async fn add_service(&self, meal_name: &str, service_name: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.services.insert(
            id,
            ServiceRecord {
                meal_name: meal_name.to_string(),
                name: service_name.to_string(),
            },
        );
        id
    }

    /// Number of cache entries currently stored
    pub async fn cache_len(&self) -> usize {
        self.state.lock().await.cache.len()
    }
}

#[async_trait]
impl ItemRepo for MemoryPlanningStore {
    async fn find_item(&self, item_id: i64) -> PlanningResult<Option<Item>> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }

    async fn service_exists(&self, service_id: i64) -> PlanningResult<bool> {
        Ok(self.state.lock().await.services.contains_key(&service_id))
    }

    async fn list_service_items(&self, service_id: i64) -> PlanningResult<Vec<Item>> {
        let state = self.state.lock().await;
        let mut items: Vec<Item> = state
            .items
            .values()
            .filter(|item| item.service_id == service_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.order);
        Ok(items)
    }

    async fn apply_order_ops(&self, ops: &[OrderOp]) -> PlanningResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        for op in ops {
            next.apply(op)?;
        }
        *state = next;
        Ok(())
    }

    async fn append_item(&self, service_id: i64, item: &NewItem) -> PlanningResult<Item> {
        let mut state = self.state.lock().await;
        if !state.services.contains_key(&service_id) {
            return Err(PlanningError::NotFound(format!("service {service_id}")));
        }

        let order = state
            .items
            .values()
            .filter(|existing| existing.service_id == service_id)
            .map(|existing| existing.order)
            .max()
            .map_or(0, |max| max + 1);

        let id = state.next_id();
        let created = Item {
            id,
            service_id,
            name: item.name.clone(),
            quantity: item.quantity.clone(),
            note: item.note.clone(),
            price: item.price,
            assigned_person_id: item.assigned_person_id,
            order,
            checked: false,
        };
        state.items.insert(id, created.clone());
        Ok(created)
    }
}

#[async_trait]
impl IngredientRepo for MemoryPlanningStore {
    async fn replace_item_ingredients(
        &self,
        item_id: i64,
        ingredients: &[GeneratedIngredient],
    ) -> PlanningResult<Vec<Ingredient>> {
        let mut state = self.state.lock().await;
        if !state.items.contains_key(&item_id) {
            return Err(PlanningError::NotFound(format!("item {item_id}")));
        }

        state.ingredients.retain(|_, ingredient| ingredient.item_id != item_id);

        let mut created = Vec::with_capacity(ingredients.len());
        for (generated, order) in ingredients.iter().zip(0..) {
            let id = state.next_id();
            let ingredient = Ingredient {
                id,
                item_id,
                name: generated.name.clone(),
                quantity: generated.quantity.clone(),
                category: generated.category.clone(),
                order,
                checked: false,
            };
            state.ingredients.insert(id, ingredient.clone());
            created.push(ingredient);
        }
        Ok(created)
    }

    async fn list_item_ingredients(&self, item_id: i64) -> PlanningResult<Vec<Ingredient>> {
        let state = self.state.lock().await;
        let mut ingredients: Vec<Ingredient> = state
            .ingredients
            .values()
            .filter(|ingredient| ingredient.item_id == item_id)
            .cloned()
            .collect();
        ingredients.sort_by_key(|ingredient| ingredient.order);
        Ok(ingredients)
    }

    async fn set_checked(&self, sources: &[SourceRef], checked: bool) -> PlanningResult<()> {
        let mut state = self.state.lock().await;

        for source in sources {
            let exists = match source {
                SourceRef::Ingredient(id) => state.ingredients.contains_key(id),
                SourceRef::Item(id) => state.items.contains_key(id),
            };
            if !exists {
                return Err(PlanningError::NotFound(source.to_string()));
            }
        }

        for source in sources {
            match source {
                SourceRef::Ingredient(id) => {
                    if let Some(ingredient) = state.ingredients.get_mut(id) {
                        ingredient.checked = checked;
                    }
                }
                SourceRef::Item(id) => {
                    if let Some(item) = state.items.get_mut(id) {
                        item.checked = checked;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheRepo for MemoryPlanningStore {
    async fn find_cache_entry(
        &self,
        dish_key: &str,
        serving_count: i32,
    ) -> PlanningResult<Option<IngredientCacheEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .cache
            .get(&(dish_key.to_string(), serving_count))
            .cloned())
    }

    async fn upsert_cache_entry(&self, entry: &IngredientCacheEntry) -> PlanningResult<()> {
        let mut state = self.state.lock().await;
        state
            .cache
            .insert((entry.dish_key.clone(), entry.serving_count), entry.clone());
        Ok(())
    }
}

#[async_trait]
impl ShoppingRepo for MemoryPlanningStore {
    async fn list_person_items(&self, person_id: i64) -> PlanningResult<Vec<PlannedItem>> {
        let state = self.state.lock().await;

        let mut items: Vec<&Item> = state
            .items
            .values()
            .filter(|item| item.assigned_person_id == Some(person_id))
            .collect();
        items.sort_by_key(|item| (item.service_id, item.order));

        let planned = items
            .into_iter()
            .map(|item| {
                let mut ingredients: Vec<Ingredient> = state
                    .ingredients
                    .values()
                    .filter(|ingredient| ingredient.item_id == item.id)
                    .cloned()
                    .collect();
                ingredients.sort_by_key(|ingredient| ingredient.order);

                let service = state.services.get(&item.service_id);
                PlannedItem {
                    item: item.clone(),
                    ingredients,
                    meal_name: service.map(|s| s.meal_name.clone()).unwrap_or_default(),
                    service_name: service.map(|s| s.name.clone()).unwrap_or_default(),
                }
            })
            .collect();

        Ok(planned)
    }
}
